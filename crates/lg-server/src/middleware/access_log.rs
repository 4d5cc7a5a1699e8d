//! Access-log middleware: one JSON line per request (§6 "Log format"), plus
//! the dispatch point for middleware extensions' `http.request` hooks
//! (§4.4.4), since both need to see the request before the handler runs and
//! the response after it returns.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use lg_monitoring::AccessLogEntry;
use lg_types::RequestContext;

use crate::state::AppState;

pub async fn access_log_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let ctx = req.extensions().get::<RequestContext>().cloned();
    let (request_id, client_ip) = ctx
        .as_ref()
        .map(|c| (c.request_id.clone(), c.client_ip.clone()))
        .unwrap_or_else(|| ("unknown".to_string(), None));

    state
        .hooks
        .run_http_request_hooks(&path, &request_id, client_ip.as_deref())
        .await;

    let response = next.run(req).await;

    let latency_ms = ctx.map(|c| c.elapsed().as_millis() as u64).unwrap_or(0);
    let entry = AccessLogEntry::new(
        request_id,
        method,
        path,
        response.status().as_u16(),
        None,
        false,
        0,
        latency_ms,
        client_ip,
    );
    if let Err(e) = state.access_log.log(&entry) {
        tracing::warn!(error = %e, "failed to write access log entry");
    }

    response
}
