pub mod image;
pub mod openai;
pub mod upstream;

pub use openai::{ChatCompletionsRequest, ChatCompletionsResponse};
pub use upstream::UpstreamPayloadBuilder;
