//! Linux hardware backend: sysfs GPIO lines and `/dev/i2c-*` buses.

use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin, StatefulOutputPin};
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{Delay, I2cdev, SysfsPin};
use tracing::debug;

use crate::error::{DeviceError, DeviceResult};
use crate::model::ChipKind;

use super::chips::{Bme280, Htu21d, Sht31};
use super::{DriverBackend, OutputLine, SensorChip};

#[derive(Debug)]
pub struct LineError(String);

impl digital::Error for LineError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Exported sysfs GPIO line configured as output.
pub struct SysfsLine {
    pin: SysfsPin,
}

impl SysfsLine {
    pub fn open(number: u32, initial_high: bool) -> DeviceResult<Self> {
        let unavailable = |e: linux_embedded_hal::sysfs_gpio::Error| DeviceError::PinUnavailable {
            pin: number,
            message: e.to_string(),
        };
        let pin = SysfsPin::new(u64::from(number));
        pin.export().map_err(unavailable)?;
        let direction = if initial_high {
            Direction::High
        } else {
            Direction::Low
        };
        pin.set_direction(direction).map_err(unavailable)?;
        Ok(Self { pin })
    }
}

impl ErrorType for SysfsLine {
    type Error = LineError;
}

impl OutputPin for SysfsLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.pin
            .set_value(0)
            .map_err(|e| LineError(e.to_string()))
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.pin
            .set_value(1)
            .map_err(|e| LineError(e.to_string()))
    }
}

impl StatefulOutputPin for SysfsLine {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        self.pin
            .get_value()
            .map(|v| v != 0)
            .map_err(|e| LineError(e.to_string()))
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        self.is_set_high().map(|high| !high)
    }
}

/// Backend for a Raspberry Pi class board.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxBackend;

impl DriverBackend for LinuxBackend {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn output_line(&self, pin: u32, initial_high: bool) -> DeviceResult<Box<dyn OutputLine>> {
        let line = SysfsLine::open(pin, initial_high)?;
        debug!(pin, initial_high, "GPIO line exported");
        Ok(Box::new(line))
    }

    fn sensor_chip(
        &self,
        device: &str,
        kind: ChipKind,
        bus: &str,
        address: u8,
    ) -> DeviceResult<Box<dyn SensorChip>> {
        let i2c = I2cdev::new(bus).map_err(|e| DeviceError::Chip {
            device: device.to_string(),
            message: format!("cannot open {}: {}", bus, e),
        })?;
        debug!(device, bus, address = %format!("0x{:02X}", address), chip = %kind, "I2C chip opened");

        let chip: Box<dyn SensorChip> = match kind {
            ChipKind::Bme280 => Box::new(Bme280::new(i2c, Delay, address)),
            ChipKind::Sht31 => Box::new(Sht31::new(i2c, Delay, address)),
            ChipKind::Htu21d => Box::new(Htu21d::new(i2c, Delay, address)),
        };
        Ok(chip)
    }
}
