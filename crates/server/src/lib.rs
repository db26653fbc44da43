//! Supportdesk realtime server.
//!
//! Pushes conversation and notification events to connected agent sockets.
//! REST and webhook handlers publish through [`hub::Publisher`] after their
//! writes commit; browsers subscribe to rooms over `/cable`.

pub mod auth;
pub mod config;
pub mod frontend;
pub mod hub;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{
    routing::{any, get},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let frontend = state.config.frontend.clone();

    let app = Router::new()
        .route("/health", get(routes::health::health))
        // WebSocket
        .route("/cable", get(ws::ws_handler))
        .route("/api/{*rest}", any(routes::health::api_not_found))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    frontend::with_frontend_fallback(app, &frontend)
}
