//! Cross-cutting observability: structured logging with secret redaction
//! (§7, §9 "Sensitive-value redaction") and the JSON-lines access log
//! written for every request (§6 "Log format").

pub mod access_log;
pub mod logging;

pub use access_log::{AccessLogEntry, AccessLogger};
pub use logging::init_logging;
