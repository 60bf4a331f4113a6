//! Controller configuration.
//!
//! The controller is described by a single TOML document:
//!
//! ```toml
//! [system]
//! i2c_power_pin = 17
//!
//! [[relays]]
//! type = "GPIO"
//! name = "display"
//! attrs = { pin = 23 }
//!
//! [[relays]]
//! type = "WiFi"
//! name = "heater"
//! attrs = { url = "http://192.168.1.50/api/relay/1" }
//!
//! [[sensors]]
//! type = "I2C_BME"
//! name = "in"
//! attrs = { address = 0x76 }
//!
//! [sensors.capabilities]
//! temperature = {}
//! relative_humidity = { alias = "humidity" }
//! pressure = { calibration = "{} - 10" }
//!
//! [mpd]
//! host = "localhost"
//! port = 6600
//! ```
//!
//! Loading only checks the document shape. Whether a pin exists or a
//! formula compiles is decided when the device registry is bootstrapped.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::validation_err;

/// Backend-specific device parameters (`pin`, `url`, `address`, ...).
pub type Attrs = BTreeMap<String, serde_json::Value>;

/// Recognised device type tags.
pub mod device_types {
    pub const GPIO: &str = "GPIO";
    pub const WIFI: &str = "WiFi";
    pub const I2C_BME: &str = "I2C_BME";
    pub const I2C_SHT: &str = "I2C_SHT";
    pub const I2C_HTU: &str = "I2C_HTU";

    pub const RELAYS: &[&str] = &[GPIO, WIFI];
    pub const SENSORS: &[&str] = &[I2C_BME, I2C_SHT, I2C_HTU];
}

/// Default values for optional settings.
pub mod defaults {
    pub const POLL_INTERVAL_SECS: u64 = 30;
    pub const READ_TIMEOUT_MS: u64 = 2000;
    pub const BUS_SETTLE_MS: u64 = 100;
    pub const MAX_CONCURRENT_READS: usize = 4;
    pub const SHUTDOWN_GRACE_MS: u64 = 3000;
    pub const I2C_BUS: &str = "/dev/i2c-1";
    pub const MPD_HOST: &str = "localhost";
    pub const MPD_PORT: u16 = 6600;
    pub const MPD_TIMEOUT_MS: u64 = 3000;
    pub const SERVER_HOST: &str = "0.0.0.0";
    pub const SERVER_PORT: u16 = 8000;
}

/// Environment variable names.
pub mod env_vars {
    /// Path of the configuration file.
    pub const CONFIG: &str = "HEARTH_CONFIG";
    /// Overrides `scheduler.poll_interval_secs`.
    pub const POLL_INTERVAL_SECS: &str = "HEARTH_POLL_INTERVAL_SECS";
    /// Emit JSON logs when set to `true`.
    pub const LOG_JSON: &str = "HEARTH_LOG_JSON";

    /// Poll interval from the environment, if set and valid.
    pub fn poll_interval_secs() -> Option<u64> {
        std::env::var(POLL_INTERVAL_SECS)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
    }

    /// Whether JSON logging is requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }

    /// Configuration path from the environment, or `config.toml`.
    pub fn config_path() -> String {
        std::env::var(CONFIG).unwrap_or_else(|_| "config.toml".to_string())
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HearthConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub relays: Vec<RelaySpec>,
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
    #[serde(default)]
    pub mpd: Option<MpdConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Hardware-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// GPIO line that gates power to the I2C bus. `None` means the bus is
    /// always powered.
    #[serde(default)]
    pub i2c_power_pin: Option<u32>,
    /// I2C character device.
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: String,
    /// Switch the bus off after every poll cycle.
    #[serde(default)]
    pub power_down_between_cycles: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            i2c_power_pin: None,
            i2c_bus: default_i2c_bus(),
            power_down_between_cycles: false,
        }
    }
}

fn default_i2c_bus() -> String {
    defaults::I2C_BUS.to_string()
}

/// A boolean actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub attrs: Attrs,
}

/// A numeric reading source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub attrs: Attrs,
    /// Declared capability name to options. An empty table means identity
    /// calibration and no alias.
    #[serde(default)]
    pub capabilities: BTreeMap<String, CapabilityOptions>,
}

/// Per-capability options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilityOptions {
    /// Formula applied to the raw reading, e.g. `{} - 10`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<String>,
    /// Externally visible name for the capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Music player daemon endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdConfig {
    #[serde(default = "default_mpd_host")]
    pub host: String,
    #[serde(default = "default_mpd_port")]
    pub port: u16,
    #[serde(default = "default_mpd_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: default_mpd_host(),
            port: default_mpd_port(),
            timeout_ms: default_mpd_timeout_ms(),
        }
    }
}

impl MpdConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_mpd_host() -> String {
    defaults::MPD_HOST.to_string()
}

fn default_mpd_port() -> u16 {
    defaults::MPD_PORT
}

fn default_mpd_timeout_ms() -> u64 {
    defaults::MPD_TIMEOUT_MS
}

/// Polling and timing inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_bus_settle_ms")]
    pub bus_settle_ms: u64,
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            read_timeout_ms: default_read_timeout_ms(),
            bus_settle_ms: default_bus_settle_ms(),
            max_concurrent_reads: default_max_concurrent_reads(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn bus_settle(&self) -> Duration {
        Duration::from_millis(self.bus_settle_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_poll_interval_secs() -> u64 {
    defaults::POLL_INTERVAL_SECS
}

fn default_read_timeout_ms() -> u64 {
    defaults::READ_TIMEOUT_MS
}

fn default_bus_settle_ms() -> u64 {
    defaults::BUS_SETTLE_MS
}

fn default_max_concurrent_reads() -> usize {
    defaults::MAX_CONCURRENT_READS
}

fn default_shutdown_grace_ms() -> u64 {
    defaults::SHUTDOWN_GRACE_MS
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

fn default_server_host() -> String {
    defaults::SERVER_HOST.to_string()
}

fn default_server_port() -> u16 {
    defaults::SERVER_PORT
}

impl HearthConfig {
    /// Read, decode and validate a configuration file, then apply
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env_overrides();
        tracing::debug!(
            path = %path.display(),
            relays = config.relays.len(),
            sensors = config.sensors.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Decode and validate a configuration document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HEARTH_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_vars::poll_interval_secs() {
            self.scheduler.poll_interval_secs = secs;
        }
    }

    /// Schema-level checks: names present and unique across relays and
    /// sensors, type tags recognised, timing values usable.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for relay in &self.relays {
            check_name(&relay.name)?;
            if !device_types::RELAYS.contains(&relay.kind.as_str()) {
                return Err(validation_err!(
                    "relay '{}' has unknown type '{}' (expected one of {:?})",
                    relay.name,
                    relay.kind,
                    device_types::RELAYS
                ));
            }
            if !seen.insert(relay.name.as_str()) {
                return Err(validation_err!("duplicate device name '{}'", relay.name));
            }
        }

        for sensor in &self.sensors {
            check_name(&sensor.name)?;
            if !device_types::SENSORS.contains(&sensor.kind.as_str()) {
                return Err(validation_err!(
                    "sensor '{}' has unknown type '{}' (expected one of {:?})",
                    sensor.name,
                    sensor.kind,
                    device_types::SENSORS
                ));
            }
            if !seen.insert(sensor.name.as_str()) {
                return Err(validation_err!("duplicate device name '{}'", sensor.name));
            }
            for (capability, options) in &sensor.capabilities {
                check_name(capability)?;
                if let Some(alias) = &options.alias {
                    if alias.trim().is_empty() {
                        return Err(validation_err!(
                            "sensor '{}' capability '{}' has an empty alias",
                            sensor.name,
                            capability
                        ));
                    }
                }
            }
        }

        if self.scheduler.poll_interval_secs == 0 {
            return Err(validation_err!("scheduler.poll_interval_secs must be > 0"));
        }
        if self.scheduler.max_concurrent_reads == 0 {
            return Err(validation_err!("scheduler.max_concurrent_reads must be > 0"));
        }

        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(validation_err!("device and capability names must not be empty"));
    }
    if name.contains('/') {
        return Err(validation_err!("name '{}' must not contain '/'", name));
    }
    Ok(())
}
