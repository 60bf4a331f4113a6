//! Hearth device layer.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `http` | ✅ | WiFi relays over HTTP |
//! | `hardware` | ❌ | Linux GPIO and I2C backend |
//!
//! ## Architecture
//!
//! - **DeviceRegistry**: builds relays and sensors from configuration
//! - **CapabilityRegistry**: canonical names and calibration per capability
//! - **BusPowerSequencer**: owns I2C bus power and the bus-exclusive section
//! - **PollingScheduler**: periodic sensor reads into the **ReadingCache**
//! - **CommandDispatcher**: relay commands, one lane per relay
//! - **Controller**: the facade the API and CLI use
//!
//! Drivers reach hardware through a [`DriverBackend`]. The
//! [`SimulatedBackend`] is always available.

pub mod bus;
pub mod cache;
pub mod capability;
pub mod dispatcher;
pub mod drivers;
pub mod error;
pub mod model;
pub mod mpd;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use bus::BusPowerSequencer;
pub use cache::{Reading, ReadingCache, ReadingStatus, ReadingView};
pub use capability::{Calibration, CapabilityRegistry, ResolvedCapability};
pub use dispatcher::{CommandDispatcher, RelayAck, RelayInfo};
pub use drivers::simulated::{SimulatedBackend, SimulatedChip, SimulatedLine};
pub use drivers::{Device, DriverBackend, OutputLine, Relay, Sensor, SensorChip};
pub use error::{DeviceError, DeviceResult};
pub use model::{ChipKind, DeviceCategory, DeviceType, RelayState};
pub use mpd::{MpdClient, MpdError, MpdResponse};
pub use registry::DeviceRegistry;
pub use scheduler::{CycleReport, PollingScheduler, SchedulerHandle, SchedulerSettings};
pub use service::{format_value, Controller, ControllerStatus};

#[cfg(feature = "hardware")]
pub use drivers::linux::LinuxBackend;
