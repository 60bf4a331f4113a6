//! Sensor handlers. Every response comes from the reading cache; nothing
//! here waits for a bus transaction.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use serde::Serialize;
use tracing::warn;

use hearth_devices::{format_value, ReadingStatus, ReadingView};

use super::common::{ok, HandlerResult, UNAVAILABLE};
use super::ServerState;
use crate::models::ErrorResponse;

/// Canonical capability name to formatted value.
pub type SensorValues = BTreeMap<String, String>;

/// One entry of the sensor listing.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SensorEntry {
    Values(SensorValues),
    Unavailable(&'static str),
}

fn never_read(views: &[ReadingView]) -> bool {
    !views.is_empty() && views.iter().all(|v| v.status == ReadingStatus::NeverRead)
}

fn formatted(views: &[ReadingView]) -> SensorValues {
    views
        .iter()
        .map(|v| {
            let value = v
                .value
                .map(format_value)
                .unwrap_or_else(|| UNAVAILABLE.to_string());
            (v.capability.clone(), value)
        })
        .collect()
}

/// GET /api/sensor
pub async fn list_sensors_handler(
    State(state): State<ServerState>,
) -> HandlerResult<BTreeMap<String, SensorEntry>> {
    let controller = &state.controller;
    let mut sensors = BTreeMap::new();
    for name in controller.sensor_names() {
        let views = controller.sensor_values(name)?;
        let entry = if never_read(&views) {
            warn!(sensor = %name, "Sensor is not available");
            SensorEntry::Unavailable(UNAVAILABLE)
        } else {
            SensorEntry::Values(formatted(&views))
        };
        sensors.insert(name.to_string(), entry);
    }
    ok(sensors)
}

/// GET /api/sensor/:name
pub async fn get_sensor_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> HandlerResult<SensorValues> {
    let views = state.controller.sensor_values(&name)?;
    if never_read(&views) {
        return Err(ErrorResponse::service_unavailable(format!(
            "Sensor '{}' is not available",
            name
        )));
    }
    ok(formatted(&views))
}

/// Latest reading of one capability, with its freshness.
///
/// GET /api/sensor/:name/:capability
pub async fn get_reading_handler(
    State(state): State<ServerState>,
    Path((name, capability)): Path<(String, String)>,
) -> HandlerResult<ReadingView> {
    ok(state.controller.get_reading(&name, &capability)?)
}
