//! Core types for Hearth.
//!
//! This crate holds what every other crate agrees on: the unified error
//! type, the configuration document, and the calibration formula language.

pub mod config;
pub mod error;
pub mod expr;

pub use config::{
    device_types, env_vars, Attrs, CapabilityOptions, HearthConfig, MpdConfig, RelaySpec,
    SchedulerConfig, SensorSpec, ServerConfig, SystemConfig,
};
pub use error::{Error, Result};
pub use expr::{evaluate, CalibrationExpr, ExprError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{device_types, env_vars, HearthConfig};
    pub use crate::error::{Error, Result};
    pub use crate::expr::{CalibrationExpr, ExprError};
}
