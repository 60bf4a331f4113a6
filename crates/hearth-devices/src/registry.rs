//! Device Registry
//!
//! Builds every configured device once at startup and holds them for the
//! life of the process. Bootstrap is all-or-nothing: an unknown type, a
//! missing attribute, an unavailable pin, a bad calibration formula or a
//! capability collision aborts it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use hearth_core::{Attrs, HearthConfig, RelaySpec, SensorSpec};

use crate::bus::BusPowerSequencer;
use crate::capability::CapabilityRegistry;
use crate::drivers::gpio::GpioRelay;
use crate::drivers::i2c::I2cSensor;
use crate::drivers::{Device, DriverBackend, Relay, Sensor};
use crate::error::{DeviceError, DeviceResult};
use crate::model::{DeviceCategory, DeviceType};

/// GPIO relays switch on a low level unless configured otherwise.
pub const DEFAULT_ACTIVE_LOW: bool = true;

pub struct DeviceRegistry {
    /// Configuration order.
    devices: Vec<Device>,
    index: HashMap<String, usize>,
    capabilities: CapabilityRegistry,
    bus: Arc<BusPowerSequencer>,
}

impl DeviceRegistry {
    /// Build all devices described by `config`.
    pub fn bootstrap(config: &HearthConfig, backend: &dyn DriverBackend) -> DeviceResult<Self> {
        let bus = match config.system.i2c_power_pin {
            Some(pin) => {
                let line = backend.output_line(pin, false)?;
                Arc::new(BusPowerSequencer::new(
                    pin,
                    line,
                    config.scheduler.bus_settle(),
                )?)
            }
            None => Arc::new(BusPowerSequencer::always_on()),
        };

        let mut registry = Self {
            devices: Vec::with_capacity(config.relays.len() + config.sensors.len()),
            index: HashMap::new(),
            capabilities: CapabilityRegistry::new(),
            bus,
        };

        for spec in &config.relays {
            let relay = registry.build_relay(spec, config, backend)?;
            registry.insert(Device::Relay(relay))?;
        }
        for spec in &config.sensors {
            let sensor = registry.build_sensor(spec, config, backend)?;
            registry.insert(Device::Sensor(sensor))?;
        }

        info!(
            backend = backend.name(),
            relays = config.relays.len(),
            sensors = config.sensors.len(),
            power_pin = ?config.system.i2c_power_pin,
            "Device registry ready"
        );
        Ok(registry)
    }

    fn insert(&mut self, device: Device) -> DeviceResult<()> {
        let name = device.name().to_string();
        if self.index.contains_key(&name) {
            return Err(DeviceError::DuplicateDevice(name));
        }
        self.index.insert(name, self.devices.len());
        self.devices.push(device);
        Ok(())
    }

    fn check_unique(&self, name: &str) -> DeviceResult<()> {
        if self.index.contains_key(name) {
            return Err(DeviceError::DuplicateDevice(name.to_string()));
        }
        Ok(())
    }

    fn build_relay(
        &self,
        spec: &RelaySpec,
        config: &HearthConfig,
        backend: &dyn DriverBackend,
    ) -> DeviceResult<Arc<dyn Relay>> {
        self.check_unique(&spec.name)?;
        let device_type = parse_type(&spec.name, &spec.kind, DeviceCategory::Relay)?;

        let relay: Arc<dyn Relay> = match device_type {
            DeviceType::Gpio => {
                let pin = attr_u32(&spec.name, &spec.attrs, "pin")?;
                if config.system.i2c_power_pin == Some(pin) {
                    return Err(invalid(
                        &spec.name,
                        "pin",
                        format!("pin {} is the I2C power line", pin),
                    ));
                }
                let active_low =
                    attr_bool(&spec.name, &spec.attrs, "active_low")?.unwrap_or(DEFAULT_ACTIVE_LOW);
                // Claim at the off level: high for an active-low relay.
                let line = backend.output_line(pin, active_low)?;
                debug!(relay = %spec.name, pin, active_low, "GPIO relay built");
                Arc::new(GpioRelay::new(
                    spec.name.clone(),
                    pin,
                    active_low,
                    spec.attrs.clone(),
                    line,
                ))
            }
            DeviceType::WiFi => build_wifi(spec)?,
            other => {
                return Err(DeviceError::UnknownDeviceType {
                    device: spec.name.clone(),
                    kind: other.to_string(),
                })
            }
        };
        Ok(relay)
    }

    fn build_sensor(
        &mut self,
        spec: &SensorSpec,
        config: &HearthConfig,
        backend: &dyn DriverBackend,
    ) -> DeviceResult<Arc<dyn Sensor>> {
        self.check_unique(&spec.name)?;
        let device_type = parse_type(&spec.name, &spec.kind, DeviceCategory::Sensor)?;
        let chip_kind = device_type
            .chip()
            .ok_or_else(|| DeviceError::UnknownDeviceType {
                device: spec.name.clone(),
                kind: spec.kind.clone(),
            })?;

        for (capability, options) in &spec.capabilities {
            if !chip_kind.supports(capability) {
                return Err(DeviceError::UnsupportedCapability {
                    device: spec.name.clone(),
                    capability: capability.clone(),
                });
            }
            let resolved = self.capabilities.register(
                &spec.name,
                capability,
                options.calibration.as_deref(),
                options.alias.as_deref(),
            )?;
            debug!(
                sensor = %spec.name,
                capability = %capability,
                canonical = %resolved.canonical,
                calibration = ?resolved.calibration.formula(),
                "Capability registered"
            );
        }
        if spec.capabilities.is_empty() {
            warn!(sensor = %spec.name, "Sensor declares no capabilities and will not be polled");
        }

        let address = attr_address(&spec.name, &spec.attrs)?.unwrap_or(chip_kind.default_address());
        let bus_path = attr_str(&spec.name, &spec.attrs, "bus")?
            .unwrap_or(config.system.i2c_bus.as_str());
        let chip = backend.sensor_chip(&spec.name, chip_kind, bus_path, address)?;

        debug!(
            sensor = %spec.name,
            chip = %chip_kind,
            address = %format!("0x{:02X}", address),
            bus = %bus_path,
            "I2C sensor built"
        );
        Ok(Arc::new(I2cSensor::new(
            spec.name.clone(),
            device_type,
            address,
            spec.attrs.clone(),
            chip,
            self.bus.clone(),
        )))
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.index.get(name).map(|&i| &self.devices[i])
    }

    /// Devices in configuration order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn relays(&self) -> impl Iterator<Item = &Arc<dyn Relay>> {
        self.devices.iter().filter_map(Device::as_relay)
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Arc<dyn Sensor>> {
        self.devices.iter().filter_map(Device::as_sensor)
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn bus(&self) -> &Arc<BusPowerSequencer> {
        &self.bus
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field(
                "devices",
                &self.devices.iter().map(Device::name).collect::<Vec<_>>(),
            )
            .field("bus", &self.bus)
            .finish()
    }
}

#[cfg(feature = "http")]
fn build_wifi(spec: &RelaySpec) -> DeviceResult<Arc<dyn Relay>> {
    use crate::drivers::wifi::{WifiRelay, DEFAULT_TIMEOUT};
    use reqwest::Method;
    use std::time::Duration;

    let url = attr_str(&spec.name, &spec.attrs, "url")?
        .ok_or_else(|| invalid(&spec.name, "url", "missing"))?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(invalid(&spec.name, "url", format!("'{}' is not an http(s) URL", url)));
    }

    let method = match attr_str(&spec.name, &spec.attrs, "method")? {
        None => Method::PUT,
        Some(m) if m.eq_ignore_ascii_case("PUT") => Method::PUT,
        Some(m) if m.eq_ignore_ascii_case("POST") => Method::POST,
        Some(m) => {
            return Err(invalid(
                &spec.name,
                "method",
                format!("unsupported command method '{}'", m),
            ))
        }
    };

    let timeout = match attr_u64(&spec.name, &spec.attrs, "timeout_ms")? {
        Some(0) => return Err(invalid(&spec.name, "timeout_ms", "must be > 0")),
        Some(ms) => Duration::from_millis(ms),
        None => DEFAULT_TIMEOUT,
    };

    debug!(relay = %spec.name, url = %url, method = %method, "WiFi relay built");
    Ok(Arc::new(WifiRelay::new(
        spec.name.clone(),
        url,
        method,
        timeout,
        spec.attrs.clone(),
    )))
}

#[cfg(not(feature = "http"))]
fn build_wifi(spec: &RelaySpec) -> DeviceResult<Arc<dyn Relay>> {
    Err(DeviceError::UnknownDeviceType {
        device: spec.name.clone(),
        kind: format!("{} (built without the http feature)", spec.kind),
    })
}

fn parse_type(name: &str, kind: &str, category: DeviceCategory) -> DeviceResult<DeviceType> {
    let device_type: DeviceType = kind.parse().map_err(|kind| DeviceError::UnknownDeviceType {
        device: name.to_string(),
        kind,
    })?;
    if device_type.category() != category {
        return Err(DeviceError::UnknownDeviceType {
            device: name.to_string(),
            kind: format!("{} (not a {:?})", kind, category),
        });
    }
    Ok(device_type)
}

fn invalid(device: &str, attr: &str, message: impl Into<String>) -> DeviceError {
    DeviceError::InvalidAttribute {
        device: device.to_string(),
        attr: attr.to_string(),
        message: message.into(),
    }
}

fn attr_u64(device: &str, attrs: &Attrs, key: &str) -> DeviceResult<Option<u64>> {
    match attrs.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(device, key, format!("expected a non-negative integer, got {}", v))),
    }
}

fn attr_u32(device: &str, attrs: &Attrs, key: &str) -> DeviceResult<u32> {
    let value = attr_u64(device, attrs, key)?.ok_or_else(|| invalid(device, key, "missing"))?;
    u32::try_from(value).map_err(|_| invalid(device, key, format!("{} is out of range", value)))
}

fn attr_bool(device: &str, attrs: &Attrs, key: &str) -> DeviceResult<Option<bool>> {
    match attrs.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| invalid(device, key, format!("expected a boolean, got {}", v))),
    }
}

fn attr_str<'a>(device: &str, attrs: &'a Attrs, key: &str) -> DeviceResult<Option<&'a str>> {
    match attrs.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| invalid(device, key, format!("expected a string, got {}", v))),
    }
}

/// 7-bit bus address, as an integer or a `"0x76"` string.
fn attr_address(device: &str, attrs: &Attrs) -> DeviceResult<Option<u8>> {
    let Some(value) = attrs.get("address") else {
        return Ok(None);
    };
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    };
    match parsed {
        Some(addr @ 0x03..=0x77) => Ok(Some(addr as u8)),
        Some(addr) => Err(invalid(
            device,
            "address",
            format!("0x{:X} is not a valid 7-bit address", addr),
        )),
        None => Err(invalid(device, "address", format!("cannot parse {}", value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulated::SimulatedBackend;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attrs {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_address_forms() {
        assert_eq!(attr_address("s", &attrs(json!({"address": 118}))).unwrap(), Some(0x76));
        assert_eq!(attr_address("s", &attrs(json!({"address": "0x44"}))).unwrap(), Some(0x44));
        assert_eq!(attr_address("s", &attrs(json!({"address": "64"}))).unwrap(), Some(0x40));
        assert_eq!(attr_address("s", &attrs(json!({}))).unwrap(), None);
        assert!(attr_address("s", &attrs(json!({"address": "0x80"}))).is_err());
        assert!(attr_address("s", &attrs(json!({"address": true}))).is_err());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_bootstrap_builds_devices_in_order() {
        let config = HearthConfig::from_toml(
            r#"
            [[relays]]
            type = "GPIO"
            name = "display"
            attrs = { pin = 23 }

            [[relays]]
            type = "WiFi"
            name = "heater"
            attrs = { url = "http://127.0.0.1:1/relay" }

            [[sensors]]
            type = "I2C_BME"
            name = "in"
            attrs = { address = 0x76 }
            [sensors.capabilities]
            temperature = {}
            relative_humidity = { alias = "humidity" }
            "#,
        )
        .unwrap();

        let registry = DeviceRegistry::bootstrap(&config, &SimulatedBackend::new()).unwrap();
        let names: Vec<_> = registry.devices().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["display", "heater", "in"]);
        assert_eq!(registry.relays().count(), 2);
        assert_eq!(registry.sensors().count(), 1);
        assert!(registry.bus().is_enabled());

        let debug = format!("{:?}", registry);
        assert!(debug.contains(r#"devices: ["display", "heater", "in"]"#));
        assert_eq!(
            registry
                .capabilities()
                .resolve("in", "relative_humidity")
                .unwrap()
                .canonical,
            "humidity"
        );
    }

    #[test]
    fn test_missing_pin_is_invalid_attribute() {
        let config = HearthConfig::from_toml(
            r#"
            [[relays]]
            type = "GPIO"
            name = "sound"
            "#,
        )
        .unwrap();
        let err = DeviceRegistry::bootstrap(&config, &SimulatedBackend::new()).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidAttribute { ref attr, .. } if attr == "pin"));
    }

    #[test]
    fn test_unavailable_pin_fails_bootstrap() {
        let backend = SimulatedBackend::new();
        backend.mark_pin_unavailable(24);
        let config = HearthConfig::from_toml(
            r#"
            [[relays]]
            type = "GPIO"
            name = "sound"
            attrs = { pin = 24 }
            "#,
        )
        .unwrap();
        let err = DeviceRegistry::bootstrap(&config, &backend).unwrap_err();
        assert!(err.is_bootstrap_fatal());
    }

    #[test]
    fn test_relay_on_power_pin_rejected() {
        let config = HearthConfig::from_toml(
            r#"
            [system]
            i2c_power_pin = 17

            [[relays]]
            type = "GPIO"
            name = "sound"
            attrs = { pin = 17 }
            "#,
        )
        .unwrap();
        let err = DeviceRegistry::bootstrap(&config, &SimulatedBackend::new()).unwrap_err();
        assert!(err.to_string().contains("I2C power line"));
    }

    #[test]
    fn test_unsupported_declared_capability() {
        let config = HearthConfig::from_toml(
            r#"
            [[sensors]]
            type = "I2C_HTU"
            name = "under"
            [sensors.capabilities]
            pressure = {}
            "#,
        )
        .unwrap();
        let err = DeviceRegistry::bootstrap(&config, &SimulatedBackend::new()).unwrap_err();
        assert!(matches!(err, DeviceError::UnsupportedCapability { .. }));
    }

    #[test]
    fn test_bad_formula_fails_bootstrap() {
        let config = HearthConfig::from_toml(
            r#"
            [[sensors]]
            type = "I2C_SHT"
            name = "under"
            [sensors.capabilities]
            temperature = { calibration = "{} * (2" }
            "#,
        )
        .unwrap();
        let err = DeviceRegistry::bootstrap(&config, &SimulatedBackend::new()).unwrap_err();
        assert!(matches!(err, DeviceError::CalibrationParse { .. }));
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_wifi_method_validation() {
        let config = HearthConfig::from_toml(
            r#"
            [[relays]]
            type = "WiFi"
            name = "heater"
            attrs = { url = "http://127.0.0.1:1/relay", method = "DELETE" }
            "#,
        )
        .unwrap();
        let err = DeviceRegistry::bootstrap(&config, &SimulatedBackend::new()).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidAttribute { ref attr, .. } if attr == "method"));
    }
}
