//! Device drivers.
//!
//! Every configured device is either a [`Relay`] or a [`Sensor`]. Concrete
//! backends:
//!
//! - [`gpio::GpioRelay`] drives a digital output line
//! - [`wifi::WifiRelay`] talks HTTP to a networked relay (`http` feature)
//! - [`i2c::I2cSensor`] reads a BME280, SHT31 or HTU21D chip
//!
//! Hardware access goes through the [`DriverBackend`] factory so the same
//! drivers run against real lines and chips (`hardware` feature) or against
//! the in-memory [`simulated::SimulatedBackend`].

pub mod chips;
pub mod gpio;
pub mod i2c;
#[cfg(feature = "hardware")]
pub mod linux;
pub mod simulated;
#[cfg(feature = "http")]
pub mod wifi;

use std::sync::Arc;

use async_trait::async_trait;
use embedded_hal::digital::{Error as _, StatefulOutputPin};

use hearth_core::Attrs;

use crate::error::DeviceResult;
use crate::model::{ChipKind, DeviceType, RelayState};

/// A boolean actuator.
///
/// Calls complete once the backend has acknowledged the request. Callers
/// enforce their own deadlines.
#[async_trait]
pub trait Relay: Send + Sync {
    fn name(&self) -> &str;

    fn device_type(&self) -> DeviceType;

    fn attrs(&self) -> &Attrs;

    /// Drive the relay to `state`.
    async fn set_state(&self, state: RelayState) -> DeviceResult<()>;

    /// Query the physical state.
    async fn get_state(&self) -> DeviceResult<RelayState>;

    async fn turn_on(&self) -> DeviceResult<()> {
        self.set_state(RelayState::On).await
    }

    async fn turn_off(&self) -> DeviceResult<()> {
        self.set_state(RelayState::Off).await
    }
}

/// A source of numeric readings.
#[async_trait]
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;

    fn device_type(&self) -> DeviceType;

    fn attrs(&self) -> &Attrs;

    /// Capability names the hardware can measure.
    fn supported_capabilities(&self) -> &'static [&'static str];

    /// Whether reads need the shared I2C bus powered.
    fn requires_bus_power(&self) -> bool;

    /// Read the uncalibrated value of one capability.
    async fn read_raw(&self, capability: &str) -> DeviceResult<f64>;
}

/// A registered device.
#[derive(Clone)]
pub enum Device {
    Relay(Arc<dyn Relay>),
    Sensor(Arc<dyn Sensor>),
}

impl Device {
    pub fn name(&self) -> &str {
        match self {
            Device::Relay(r) => r.name(),
            Device::Sensor(s) => s.name(),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        match self {
            Device::Relay(r) => r.device_type(),
            Device::Sensor(s) => s.device_type(),
        }
    }

    pub fn as_relay(&self) -> Option<&Arc<dyn Relay>> {
        match self {
            Device::Relay(r) => Some(r),
            Device::Sensor(_) => None,
        }
    }

    pub fn as_sensor(&self) -> Option<&Arc<dyn Sensor>> {
        match self {
            Device::Sensor(s) => Some(s),
            Device::Relay(_) => None,
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("type", &self.device_type())
            .finish()
    }
}

/// A single digital output line whose level can be read back.
pub trait OutputLine: Send {
    fn write(&mut self, high: bool) -> Result<(), String>;

    fn is_high(&mut self) -> Result<bool, String>;
}

impl<P> OutputLine for P
where
    P: StatefulOutputPin + Send,
{
    fn write(&mut self, high: bool) -> Result<(), String> {
        let result = if high { self.set_high() } else { self.set_low() };
        result.map_err(|e| format!("{:?}", e.kind()))
    }

    fn is_high(&mut self) -> Result<bool, String> {
        self.is_set_high().map_err(|e| format!("{:?}", e.kind()))
    }
}

/// A sensor chip reachable over I2C.
///
/// Implementations block for the duration of the bus transaction and are
/// only called from blocking tasks while the bus section is held.
pub trait SensorChip: Send {
    fn kind(&self) -> ChipKind;

    /// Measure one capability. `humidity` and `relative_humidity` are the
    /// same quantity.
    fn read(&mut self, capability: &str) -> Result<f64, String>;
}

/// Factory for hardware handles.
pub trait DriverBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Claim a GPIO output line, driving it to `initial_high` as it is
    /// configured for output.
    fn output_line(&self, pin: u32, initial_high: bool) -> DeviceResult<Box<dyn OutputLine>>;

    /// Open a chip at `address` on `bus`.
    fn sensor_chip(
        &self,
        device: &str,
        kind: ChipKind,
        bus: &str,
        address: u8,
    ) -> DeviceResult<Box<dyn SensorChip>>;
}
