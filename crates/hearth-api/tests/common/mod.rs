//! Common test utilities for API tests.
#![allow(dead_code)]

use std::sync::Arc;

use hearth_api::ServerState;
use hearth_core::HearthConfig;
use hearth_devices::{Controller, SimulatedBackend};

pub const CONFIG: &str = r#"
    [scheduler]
    bus_settle_ms = 0

    [[relays]]
    type = "GPIO"
    name = "display"
    attrs = { pin = 23 }

    [[relays]]
    type = "WiFi"
    name = "heater"
    attrs = { url = "http://127.0.0.1:9/relay", timeout_ms = 200 }

    [[sensors]]
    type = "I2C_BME"
    name = "in"
    attrs = { address = 0x76 }
    [sensors.capabilities]
    temperature = {}
    relative_humidity = { alias = "humidity" }
    pressure = { calibration = "{} - 10" }

    [[sensors]]
    type = "I2C_SHT"
    name = "under"
    attrs = { address = 0x44 }
    [sensors.capabilities]
    temperature = {}
"#;

/// Server state over simulated hardware. Nothing has been polled yet.
pub fn create_test_state() -> (ServerState, SimulatedBackend) {
    let config = HearthConfig::from_toml(CONFIG).unwrap();
    let backend = SimulatedBackend::new();
    backend.chip(0x76).set_value("temperature", 21.374);
    backend.chip(0x76).set_value("relative_humidity", 40.5);
    backend.chip(0x76).set_value("pressure", 1023.0);
    let controller = Controller::bootstrap(&config, &backend).unwrap();
    (ServerState::new(Arc::new(controller)), backend)
}
