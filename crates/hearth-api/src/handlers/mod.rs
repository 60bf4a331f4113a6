//! API handlers organized by domain.

pub mod basic;
pub mod common;
pub mod mpc;
pub mod relays;
pub mod sensors;

pub use crate::server::ServerState;

pub use basic::health_handler;
pub use relays::{get_relay_handler, list_relays_handler, relay_action_handler};
pub use sensors::{get_reading_handler, get_sensor_handler, list_sensors_handler};
