pub mod count_tokens;
pub mod health;
pub mod messages;
pub mod models;
pub mod openai_compat;
pub mod relay;
