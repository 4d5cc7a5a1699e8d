//! HTTP route handlers, one module per surface (§4.1, §4.4).

pub mod chat;
pub mod dynamic;
pub mod extensions;
pub mod health;
pub mod models;

pub use chat::chat_completions;
pub use dynamic::dynamic_invoke;
pub use extensions::{execute_extension, get_extension, list_extensions, refresh_extensions, upsert_extension};
pub use health::health;
pub use models::list_models;
