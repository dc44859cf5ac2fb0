//! HTTP router and handlers

use std::any::Any;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::{HeaderMap, Method, Response, StatusCode, header},
    response::IntoResponse,
    routing::{any, get},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::error;

use super::handler::ProxyHandler;
use super::response::{CorsHeaders, NO_STORE};
use crate::config::ServerConfig;

/// Shared application state
pub struct AppState {
    /// The proxy endpoint
    pub handler: ProxyHandler,
}

/// Create the router: the proxy endpoint on `server.path` (every method)
/// plus `GET /health`
pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let cors = state.handler.cors().cloned();
    let routes = Router::new()
        .route("/health", get(health_handler))
        .route(&server.path, any(proxy_handler));
    with_layers(routes, server, cors).with_state(state)
}

/// Body limit, panic recovery, tracing and request ids around `router`
fn with_layers<S>(router: Router<S>, server: &ServerConfig, cors: Option<CorsHeaders>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(CatchPanicLayer::custom(
            move |err: Box<dyn Any + Send + 'static>| panic_response(cors.as_ref(), err),
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Proxy endpoint
async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response<Body> {
    match body {
        Ok(body) => state.handler.handle(&method, &headers, body).await,
        Err(rejection) => {
            let response = (
                rejection.status(),
                [(header::CACHE_CONTROL, NO_STORE)],
                Json(json!({ "ok": false, "error": rejection.body_text() })),
            )
                .into_response();
            state.handler.with_cors(response)
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let handler = &state.handler;
    (
        [(header::CACHE_CONTROL, NO_STORE)],
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "upstreamConfigured": handler.is_configured(),
            "missing": handler.missing_configuration(),
            "cache": handler.cache().stats(),
        })),
    )
}

/// Render a panic inside a handler as a JSON 500, with CORS headers when enabled
fn panic_response(cors: Option<&CorsHeaders>, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "Internal server error".to_string()
    };
    error!(panic = %message, "Handler panicked");

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CACHE_CONTROL, NO_STORE)],
        Json(json!({ "ok": false, "error": message })),
    )
        .into_response();
    if let Some(cors) = cors {
        cors.apply(response.headers_mut());
    }
    response
}
