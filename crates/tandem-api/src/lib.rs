pub mod calls;
pub mod messages;
pub mod middleware;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use tandem_gateway::Gateway;

/// REST fallback routes, all behind bearer auth.
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/api/chat/history", get(messages::history))
        .route("/api/chat/send", post(messages::send))
        .route("/api/chat/seen", post(messages::seen))
        .route("/api/chat/conversations", get(messages::conversations))
        .route("/api/chat/typing", post(messages::typing))
        .route("/api/calls/ice-servers", get(calls::ice_servers))
        .route("/api/stats", get(calls::stats))
        .layer(axum_middleware::from_fn_with_state(gateway.clone(), middleware::require_auth))
        .with_state(gateway)
}
