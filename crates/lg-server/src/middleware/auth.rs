//! API key authentication (§4.1 "Authentication").
//!
//! Grounded on the teacher's `server/middleware/auth.rs`: an `axum::from_fn`
//! middleware rather than a `Layer`/`Service` pair, since the gateway has no
//! Tauri-specific request type to bridge. Skipped entirely when no API key
//! is configured; `/health` and `/openapi.json` never reach this layer
//! because they are mounted outside the authenticated router in `lib.rs`.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use lg_types::{AppError, RequestContext};
use lg_utils::crypto::constant_time_eq;

use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(req).await;
    };

    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|c| c.request_id.clone())
        .unwrap_or_default();

    let candidate = extract_candidate_key(&req);
    let authorized = candidate.as_deref().is_some_and(|key| constant_time_eq(expected, key));

    if authorized {
        next.run(req).await
    } else {
        AppError::Unauthorized.into_response_with_request_id(&request_id)
    }
}

fn extract_candidate_key(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let mut parts = v.splitn(2, ' ');
            let scheme = parts.next()?;
            let key = parts.next()?;
            scheme.eq_ignore_ascii_case("bearer").then_some(key)
        })
        .map(str::to_string)
}
