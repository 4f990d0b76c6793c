//! API layer - HTTP and WebSocket entry points.

pub mod http;
pub mod websocket;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::app::App;

/// Full router: HTTP routes plus the browser WebSocket at `/ws`.
pub fn router(app: Arc<App>) -> Router {
    http::routes(&app.config.proxy_prefix)
        .route("/ws", get(websocket::ws_handler))
        .with_state(app)
}
