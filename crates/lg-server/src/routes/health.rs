//! `GET /health` (§4.1, §6). Mounted outside authentication and rate
//! limiting: an operator probing liveness should never need an API key and
//! should never be throttled.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::state::AppState;
use crate::types::HealthResponse;

pub async fn health(State(state): State<AppState>) -> Response {
    let check = state.upstream.health_check().await;
    let ollama_host = state.upstream.base_url().to_string();
    if check.healthy {
        (StatusCode::OK, Json(HealthResponse::Healthy { ollama: "connected", ollama_host })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::Unhealthy {
                error: check.error.unwrap_or_else(|| "unreachable".to_string()),
                ollama_host,
            }),
        )
            .into_response()
    }
}
