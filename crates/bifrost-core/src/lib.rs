pub mod config;
pub mod error;
pub mod models;
pub mod types;

pub use config::BifrostConfig;
pub use error::{BifrostError, Result};
pub use types::{ContentBlock, Message, MessageContent, Role, ToolDefinition, Usage};
