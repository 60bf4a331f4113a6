//! Application router configuration.

use axum::{routing::get, Router};

use super::types::{ServerState, MAX_REQUEST_BODY_SIZE};
use crate::handlers::{basic, mpc, relays, sensors};

/// Create the application router with a specific state.
pub fn create_router_with_state(state: ServerState) -> Router {
    Router::new()
        .route("/api/health", get(basic::health_handler))
        .route("/api/health/status", get(basic::health_status_handler))
        // Relays
        .route("/api/relay", get(relays::list_relays_handler))
        .route("/api/relay/:name", get(relays::get_relay_handler))
        .route(
            "/api/relay/:name/:action",
            get(relays::relay_action_handler).post(relays::relay_action_handler),
        )
        // Sensors (cache only)
        .route("/api/sensor", get(sensors::list_sensors_handler))
        .route("/api/sensor/:name", get(sensors::get_sensor_handler))
        .route(
            "/api/sensor/:name/:capability",
            get(sensors::get_reading_handler),
        )
        // Music player
        .route("/api/mpc/:action", get(mpc::mpc_command_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            MAX_REQUEST_BODY_SIZE,
        ))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
