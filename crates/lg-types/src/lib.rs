//! Shared types, error types, and traits for LlamaGate

pub mod chat;
pub mod errors;
pub mod mcp_types;
pub mod request;

pub use chat::{ChatCompletionRequest, ChatMessage, MessageContent, Role, ToolCall, ToolDefinition};
pub use errors::{AppError, AppResult};
pub use request::RequestContext;
