//! Hearth HTTP API.
//!
//! Exposes the controller over REST:
//!
//! - `GET /api/health`
//! - `GET /api/relay`, `GET /api/relay/:name`, `GET|POST /api/relay/:name/:action`
//! - `GET /api/sensor`, `GET /api/sensor/:name`, `GET /api/sensor/:name/:capability`
//! - `GET /api/mpc/:action?args=...`
//!
//! Sensor endpoints answer from the reading cache and never touch the bus.

pub mod handlers;
pub mod models;
pub mod server;

pub use models::{ApiResponse, ErrorResponse};
pub use server::{create_router_with_state, run, serve, ServerState};
