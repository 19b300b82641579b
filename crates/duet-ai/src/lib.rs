//! Text-generation collaborator surface for the Duet bots.
mod openai;
mod retry;
mod types;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{ChatRequest, ChatResponse, ChatUsage, DuetAiError, LlmClient, Message, MessageRole};
