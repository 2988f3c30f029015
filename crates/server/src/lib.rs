//! HTTP/WebSocket surface for the voice call orchestration core (§4.7,
//! §6): upgrades browser and telephony connections to a bound transport
//! handler, verifies and dispatches the messenger webhook, and exposes
//! health/readiness/metrics endpoints.

pub mod carrier;
pub mod config_provider;
pub mod error;
pub mod health;
pub mod state;
pub mod webhook;
pub mod webrtc_provider;
pub mod websocket;

pub use error::ServerError;
pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builds the full route table. Callers choose the bind address and TLS
/// termination; this only wires paths to handlers.
pub fn create_router(state: AppState) -> Router {
    let widget_ws_path = state.settings.server.widget_ws_path.clone();
    let telephony_ws_path = state.settings.server.telephony_ws_path.clone();

    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .route(&widget_ws_path, get(websocket::widget_upgrade))
        .route(&telephony_ws_path, get(websocket::telephony_upgrade))
        .route("/api/messenger/webhook", get(webhook::verify).post(webhook::receive))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    if state.settings.server.cors_enabled {
        let cors = if state.settings.server.cors_origins.is_empty() {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins: Vec<_> = state
                .settings
                .server
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        };
        router = router.layer(cors);
    }

    router
}
