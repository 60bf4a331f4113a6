//! Device model shared by drivers, the registry and consumers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use hearth_core::config::device_types;

/// Backend variant tag, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "GPIO")]
    Gpio,
    #[serde(rename = "WiFi")]
    WiFi,
    #[serde(rename = "I2C_BME")]
    I2cBme,
    #[serde(rename = "I2C_SHT")]
    I2cSht,
    #[serde(rename = "I2C_HTU")]
    I2cHtu,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpio => device_types::GPIO,
            Self::WiFi => device_types::WIFI,
            Self::I2cBme => device_types::I2C_BME,
            Self::I2cSht => device_types::I2C_SHT,
            Self::I2cHtu => device_types::I2C_HTU,
        }
    }

    pub fn category(&self) -> DeviceCategory {
        match self {
            Self::Gpio | Self::WiFi => DeviceCategory::Relay,
            Self::I2cBme | Self::I2cSht | Self::I2cHtu => DeviceCategory::Sensor,
        }
    }

    /// Chip family for I2C sensor types.
    pub fn chip(&self) -> Option<ChipKind> {
        match self {
            Self::I2cBme => Some(ChipKind::Bme280),
            Self::I2cSht => Some(ChipKind::Sht31),
            Self::I2cHtu => Some(ChipKind::Htu21d),
            Self::Gpio | Self::WiFi => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            device_types::GPIO => Ok(Self::Gpio),
            device_types::WIFI => Ok(Self::WiFi),
            device_types::I2C_BME => Ok(Self::I2cBme),
            device_types::I2C_SHT => Ok(Self::I2cSht),
            device_types::I2C_HTU => Ok(Self::I2cHtu),
            other => Err(other.to_string()),
        }
    }
}

/// Whether a device is actuated or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Relay,
    Sensor,
}

/// I2C sensor chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipKind {
    Bme280,
    Sht31,
    Htu21d,
}

impl ChipKind {
    /// Capability names the chip can physically measure.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::Bme280 => &[
                capabilities::TEMPERATURE,
                capabilities::RELATIVE_HUMIDITY,
                capabilities::HUMIDITY,
                capabilities::PRESSURE,
            ],
            Self::Sht31 | Self::Htu21d => &[
                capabilities::TEMPERATURE,
                capabilities::RELATIVE_HUMIDITY,
                capabilities::HUMIDITY,
            ],
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Factory-default 7-bit bus address.
    pub fn default_address(&self) -> u8 {
        match self {
            Self::Bme280 => 0x77,
            Self::Sht31 => 0x44,
            Self::Htu21d => 0x40,
        }
    }
}

impl fmt::Display for ChipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bme280 => write!(f, "BME280"),
            Self::Sht31 => write!(f, "SHT31"),
            Self::Htu21d => write!(f, "HTU21D"),
        }
    }
}

/// Physical quantity names.
pub mod capabilities {
    /// Degrees Celsius.
    pub const TEMPERATURE: &str = "temperature";
    /// Percent relative humidity.
    pub const RELATIVE_HUMIDITY: &str = "relative_humidity";
    /// Same quantity as `relative_humidity`.
    pub const HUMIDITY: &str = "humidity";
    /// Hectopascal.
    pub const PRESSURE: &str = "pressure";
}

/// Desired or observed relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    pub fn inverse(&self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

impl From<bool> for RelayState {
    fn from(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

impl FromStr for RelayState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(Self::On),
            "off" | "0" | "false" => Ok(Self::Off),
            other => Err(format!("invalid relay state '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_round_trip_tags() {
        for tag in device_types::RELAYS.iter().chain(device_types::SENSORS) {
            let parsed: DeviceType = tag.parse().unwrap();
            assert_eq!(parsed.as_str(), *tag);
        }
        assert!("I2C_XYZ".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_categories() {
        assert_eq!(DeviceType::Gpio.category(), DeviceCategory::Relay);
        assert_eq!(DeviceType::I2cHtu.category(), DeviceCategory::Sensor);
        assert_eq!(DeviceType::I2cBme.chip(), Some(ChipKind::Bme280));
        assert_eq!(DeviceType::WiFi.chip(), None);
    }

    #[test]
    fn test_chip_capabilities() {
        assert!(ChipKind::Bme280.supports("pressure"));
        assert!(!ChipKind::Sht31.supports("pressure"));
        assert!(ChipKind::Htu21d.supports("relative_humidity"));
        assert!(!ChipKind::Htu21d.supports("co2"));
    }

    #[test]
    fn test_relay_state_parsing() {
        assert_eq!("ON".parse::<RelayState>().unwrap(), RelayState::On);
        assert_eq!("off".parse::<RelayState>().unwrap(), RelayState::Off);
        assert!("toggle".parse::<RelayState>().is_err());
        assert_eq!(RelayState::On.inverse(), RelayState::Off);
        assert_eq!(RelayState::from(true), RelayState::On);
    }
}
