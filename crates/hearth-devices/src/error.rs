//! Device layer errors.

use std::time::Duration;

use hearth_core::ExprError;

/// Re-export the core error type
pub use hearth_core::Error as HearthError;

/// Result type for device operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors raised by drivers, the registry, the scheduler and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A calibration formula failed to compile.
    #[error("Calibration error on {device}.{capability}: {source}")]
    CalibrationParse {
        device: String,
        capability: String,
        #[source]
        source: ExprError,
    },

    /// A calibration divisor evaluated to zero.
    #[error("Division by zero calibrating {device}.{capability}")]
    DivisionByZero { device: String, capability: String },

    /// Two capabilities of one device resolve to the same canonical name.
    #[error(
        "Capability collision on '{device}': '{first}' and '{second}' both resolve to '{canonical}'"
    )]
    CapabilityCollision {
        device: String,
        canonical: String,
        first: String,
        second: String,
    },

    /// The chip cannot measure the requested quantity.
    #[error("Sensor '{device}' does not support capability '{capability}'")]
    UnsupportedCapability { device: String, capability: String },

    /// An I2C read was attempted while the bus power line was off.
    #[error("I2C bus is not powered (sensor '{device}')")]
    BusNotPowered { device: String },

    /// The bus power line could not be driven.
    #[error("Bus power transition failed: {0}")]
    BusPower(String),

    /// A WiFi relay request failed; the physical state is unknown.
    #[error("Relay '{relay}' unreachable: {message}")]
    RelayNetwork { relay: String, message: String },

    /// The named device exists but is not a relay.
    #[error("Device '{0}' is not a relay")]
    NotARelay(String),

    /// A driver call exceeded its deadline.
    #[error("Driver timeout after {timeout:?} on '{device}'")]
    DriverTimeout { device: String, timeout: Duration },

    /// No device with that name.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// No such capability on the named sensor.
    #[error("Capability '{capability}' not found on sensor '{device}'")]
    CapabilityNotFound { device: String, capability: String },

    /// Two devices share a name.
    #[error("Duplicate device name: {0}")]
    DuplicateDevice(String),

    /// The type tag has no backend.
    #[error("Unknown device type '{kind}' for '{device}'")]
    UnknownDeviceType { device: String, kind: String },

    /// A required attribute is missing or malformed.
    #[error("Invalid attribute '{attr}' on '{device}': {message}")]
    InvalidAttribute {
        device: String,
        attr: String,
        message: String,
    },

    /// A GPIO line could not be claimed or driven.
    #[error("GPIO pin {pin} unavailable: {message}")]
    PinUnavailable { pin: u32, message: String },

    /// Low-level chip transaction failure.
    #[error("Sensor chip error on '{device}': {message}")]
    Chip { device: String, message: String },

    /// Music daemon failure.
    #[error("MPD error: {0}")]
    Mpd(#[from] crate::mpd::MpdError),
}

impl DeviceError {
    /// Whether this error must abort bootstrap.
    pub fn is_bootstrap_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::CalibrationParse { .. }
                | DeviceError::DivisionByZero { .. }
                | DeviceError::CapabilityCollision { .. }
                | DeviceError::UnsupportedCapability { .. }
                | DeviceError::DuplicateDevice(_)
                | DeviceError::UnknownDeviceType { .. }
                | DeviceError::InvalidAttribute { .. }
                | DeviceError::PinUnavailable { .. }
        )
    }

    /// Whether the caller may try again later without changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::BusNotPowered { .. }
                | DeviceError::BusPower(_)
                | DeviceError::RelayNetwork { .. }
                | DeviceError::DriverTimeout { .. }
                | DeviceError::Chip { .. }
                | DeviceError::Mpd(_)
        )
    }
}

impl From<DeviceError> for HearthError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::DeviceNotFound(_) | DeviceError::CapabilityNotFound { .. } => {
                HearthError::NotFound(e.to_string())
            }
            DeviceError::DriverTimeout { .. } => HearthError::Timeout(e.to_string()),
            DeviceError::RelayNetwork { .. } | DeviceError::Mpd(_) => {
                HearthError::Network(e.to_string())
            }
            DeviceError::CalibrationParse {
                device,
                capability,
                source,
            } => HearthError::Parse {
                location: format!("{}.{}", device, capability),
                message: source.to_string(),
            },
            e if e.is_bootstrap_fatal() => HearthError::Validation(e.to_string()),
            e => HearthError::Device(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_classification() {
        let collision = DeviceError::CapabilityCollision {
            device: "in".into(),
            canonical: "humidity".into(),
            first: "humidity".into(),
            second: "relative_humidity".into(),
        };
        assert!(collision.is_bootstrap_fatal());
        assert!(!collision.is_transient());

        let offline = DeviceError::RelayNetwork {
            relay: "heater".into(),
            message: "timed out".into(),
        };
        assert!(!offline.is_bootstrap_fatal());
        assert!(offline.is_transient());
    }

    #[test]
    fn test_conversion_to_core_error() {
        let err: HearthError = DeviceError::DeviceNotFound("attic".into()).into();
        assert!(matches!(err, HearthError::NotFound(_)));

        let err: HearthError = DeviceError::DriverTimeout {
            device: "in".into(),
            timeout: Duration::from_millis(50),
        }
        .into();
        assert!(matches!(err, HearthError::Timeout(_)));

        let err: HearthError = DeviceError::CalibrationParse {
            device: "in".into(),
            capability: "pressure".into(),
            source: ExprError::DivisionByZero,
        }
        .into();
        match err {
            HearthError::Parse { location, .. } => assert_eq!(location, "in.pressure"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
