//! Sensor on the shared I2C bus.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use hearth_core::Attrs;

use crate::bus::BusPowerSequencer;
use crate::error::{DeviceError, DeviceResult};
use crate::model::{ChipKind, DeviceType};

use super::{Sensor, SensorChip};

/// A BME280, SHT31 or HTU21D sensor.
///
/// Each read checks the chip supports the capability and that the bus is
/// powered, then runs the transaction on a blocking thread inside the bus
/// section. The section travels with the blocking task, so a caller that
/// times out does not release the bus while the chip is still talking.
pub struct I2cSensor {
    name: String,
    device_type: DeviceType,
    chip_kind: ChipKind,
    address: u8,
    attrs: Attrs,
    chip: Arc<Mutex<Box<dyn SensorChip>>>,
    bus: Arc<BusPowerSequencer>,
}

impl I2cSensor {
    pub fn new(
        name: impl Into<String>,
        device_type: DeviceType,
        address: u8,
        attrs: Attrs,
        chip: Box<dyn SensorChip>,
        bus: Arc<BusPowerSequencer>,
    ) -> Self {
        Self {
            name: name.into(),
            device_type,
            chip_kind: chip.kind(),
            address,
            attrs,
            chip: Arc::new(Mutex::new(chip)),
            bus,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn chip_kind(&self) -> ChipKind {
        self.chip_kind
    }

    fn not_powered(&self) -> DeviceError {
        DeviceError::BusNotPowered {
            device: self.name.clone(),
        }
    }
}

#[async_trait]
impl Sensor for I2cSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    fn supported_capabilities(&self) -> &'static [&'static str] {
        self.chip_kind.capabilities()
    }

    fn requires_bus_power(&self) -> bool {
        true
    }

    async fn read_raw(&self, capability: &str) -> DeviceResult<f64> {
        if !self.chip_kind.supports(capability) {
            return Err(DeviceError::UnsupportedCapability {
                device: self.name.clone(),
                capability: capability.to_string(),
            });
        }
        if !self.bus.is_enabled() {
            return Err(self.not_powered());
        }

        let section = self.bus.bus_section().await;
        // Power may have been cut while waiting for the section.
        if !self.bus.is_enabled() {
            return Err(self.not_powered());
        }

        let chip = self.chip.clone();
        let owned_capability = capability.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let _section = section;
            chip.lock().read(&owned_capability)
        })
        .await
        .map_err(|e| DeviceError::Chip {
            device: self.name.clone(),
            message: format!("read task failed: {}", e),
        })?;

        result.map_err(|message| DeviceError::Chip {
            device: self.name.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulated::{SimulatedBackend, SimulatedLine};
    use crate::drivers::DriverBackend;
    use std::time::Duration;

    fn sensor(bus: Arc<BusPowerSequencer>) -> (I2cSensor, SimulatedBackend) {
        let backend = SimulatedBackend::new();
        let chip = backend
            .sensor_chip("under", ChipKind::Sht31, "/dev/i2c-1", 0x44)
            .unwrap();
        let sensor = I2cSensor::new("under", DeviceType::I2cSht, 0x44, Attrs::new(), chip, bus);
        (sensor, backend)
    }

    #[tokio::test]
    async fn test_read_when_powered() {
        let (sensor, backend) = sensor(Arc::new(BusPowerSequencer::always_on()));
        backend.chip(0x44).set_value("temperature", 19.25);
        assert_eq!(sensor.read_raw("temperature").await.unwrap(), 19.25);
    }

    #[tokio::test]
    async fn test_unpowered_read_skips_transaction() {
        let line = SimulatedLine::new();
        let bus = Arc::new(BusPowerSequencer::new(17, Box::new(line), Duration::ZERO).unwrap());
        let (sensor, backend) = sensor(bus);

        let err = sensor.read_raw("temperature").await.unwrap_err();
        assert!(matches!(err, DeviceError::BusNotPowered { .. }));
        assert_eq!(backend.chip(0x44).transactions(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_capability() {
        let (sensor, backend) = sensor(Arc::new(BusPowerSequencer::always_on()));
        let err = sensor.read_raw("pressure").await.unwrap_err();
        assert!(matches!(err, DeviceError::UnsupportedCapability { .. }));
        assert_eq!(backend.chip(0x44).transactions(), 0);
    }

    #[tokio::test]
    async fn test_chip_failure_is_chip_error() {
        let (sensor, backend) = sensor(Arc::new(BusPowerSequencer::always_on()));
        backend.chip(0x44).set_failure(Some("nack"));
        let err = sensor.read_raw("humidity").await.unwrap_err();
        assert!(matches!(err, DeviceError::Chip { ref message, .. } if message == "nack"));
    }
}
