//! HTTP surface and process wiring for the gateway (§4.1). Builds the axum
//! [`Router`] and its middleware stack; [`crate::state`] and the binary
//! entrypoint (`main.rs`) handle singleton construction and graceful
//! shutdown.

pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod types;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::middleware::access_log::access_log_middleware;
use crate::middleware::auth::auth_middleware;
use crate::middleware::rate_limit::rate_limit_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Assembles the full router: panic recovery wraps everything, then
/// request-ID, access log, auth, and rate-limit apply in that order to every
/// route except `/health` and `/openapi.json` (§4.1 middleware ordering).
pub fn build_router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/v1/chat/completions", post(routes::chat_completions))
        .route("/v1/models", get(routes::list_models))
        .route("/v1/extensions", get(routes::list_extensions))
        .route("/v1/extensions/:name", put(routes::upsert_extension))
        .route("/v1/extensions/:name", get(routes::get_extension))
        .route("/v1/extensions/:name/execute", post(routes::execute_extension))
        .route("/v1/extensions/refresh", post(routes::refresh_extensions))
        .route("/v1/extensions/:name/*rest", axum::routing::any(routes::dynamic_invoke))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let open = Router::new()
        .route("/health", get(routes::health))
        .route("/openapi.json", get(openapi_json));

    Router::new()
        .merge(gated)
        .merge(open)
        .layer(from_fn_with_state(state.clone(), access_log_middleware))
        .layer(from_fn_with_state(state.clone(), request_id_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn openapi_json() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::to_value(ApiDoc::openapi()).unwrap_or_default())
}
