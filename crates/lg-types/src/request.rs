//! Per-request envelope threaded through the pipeline.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Carries everything the pipeline needs about one inbound request: its
/// canonical ID, the client's address, when it started, and a cancellation
/// signal that fires on client disconnect or graceful shutdown.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: Option<String>,
    pub start: Instant,
    pub cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(client_ip: Option<String>, cancellation: CancellationToken) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            client_ip,
            start: Instant::now(),
            cancellation,
        }
    }

    /// Accept a caller-supplied `X-Request-ID`, falling back to a fresh v4
    /// UUID when the header is absent, empty, or not a plausible token.
    pub fn with_request_id(
        request_id: Option<&str>,
        client_ip: Option<String>,
        cancellation: CancellationToken,
    ) -> Self {
        let request_id = match request_id {
            Some(id) if is_valid_request_id(id) => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        Self {
            request_id,
            client_ip,
            start: Instant::now(),
            cancellation,
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

/// Malformed in this context means empty, all-whitespace, or implausibly
/// long (guards against header abuse flooding logs).
fn is_valid_request_id(id: &str) -> bool {
    let trimmed = id.trim();
    !trimmed.is_empty() && trimmed.len() <= 200
}
