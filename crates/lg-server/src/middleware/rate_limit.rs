//! Process-wide rate limiting (§4.1 "Rate limiter").

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use lg_types::{AppError, RequestContext};

use crate::state::AppState;

pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|c| c.request_id.clone())
        .unwrap_or_default();

    match state.rate_limiter.try_acquire() {
        Ok(()) => next.run(req).await,
        Err(retry_after_secs) => AppError::RateLimited { retry_after_secs }.into_response_with_request_id(&request_id),
    }
}
