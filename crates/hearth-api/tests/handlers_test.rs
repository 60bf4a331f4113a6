//! Handler tests.
//!
//! Calls handlers directly with a simulated controller:
//! - Relay listing, info and actions
//! - Sensor listing and cached readings
//! - Error mapping to HTTP status codes

mod common;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use hearth_api::handlers::basic::{health_handler, health_status_handler};
use hearth_api::handlers::mpc::{mpc_command_handler, MpcQuery};
use hearth_api::handlers::relays::{
    get_relay_handler, list_relays_handler, relay_action_handler, RelayEntry,
};
use hearth_api::handlers::sensors::{
    get_reading_handler, get_sensor_handler, list_sensors_handler, SensorEntry,
};
use hearth_devices::{ReadingStatus, RelayState};

use common::create_test_state;

#[tokio::test]
async fn test_health_handler() {
    let Json(value) = health_handler().await;
    assert_eq!(value["status"], "ok");
    assert_eq!(value["service"], "hearth");
}

#[tokio::test]
async fn test_health_status_reports_controller() {
    let (state, _backend) = create_test_state();
    let Json(status) = health_status_handler(State(state)).await;
    assert_eq!(status.status, "healthy");
    assert_eq!(status.controller.relays, 2);
    assert_eq!(status.controller.sensors, 2);
    assert!(!status.controller.mpd);
}

#[tokio::test]
async fn test_relay_listing_marks_unreachable_relay() {
    let (state, _backend) = create_test_state();
    let Json(response) = list_relays_handler(State(state)).await.unwrap();
    let relays = response.data.unwrap();

    assert!(matches!(relays["display"], RelayEntry::Info(_)));
    assert!(matches!(relays["heater"], RelayEntry::Unavailable("N/A")));

    let value = serde_json::to_value(&relays).unwrap();
    assert_eq!(value["heater"], "N/A");
    assert_eq!(value["display"]["type"], "GPIO");
}

#[tokio::test]
async fn test_relay_actions() {
    let (state, backend) = create_test_state();

    let Json(response) = relay_action_handler(
        State(state.clone()),
        Path(("display".to_string(), "off".to_string())),
    )
    .await
    .unwrap();
    assert_eq!(response.data.unwrap().state, RelayState::Off);
    assert!(backend.line(23).level());

    let Json(response) = relay_action_handler(
        State(state.clone()),
        Path(("display".to_string(), "toggle".to_string())),
    )
    .await
    .unwrap();
    assert_eq!(response.data.unwrap().state, RelayState::On);

    let Json(response) = relay_action_handler(
        State(state.clone()),
        Path(("display".to_string(), "state".to_string())),
    )
    .await
    .unwrap();
    assert_eq!(response.data.unwrap().state, RelayState::On);

    let Json(response) = get_relay_handler(State(state), Path("display".to_string()))
        .await
        .unwrap();
    assert_eq!(response.data.unwrap().name, "display");
}

#[tokio::test]
async fn test_relay_action_errors() {
    let (state, _backend) = create_test_state();

    let err = relay_action_handler(
        State(state.clone()),
        Path(("display".to_string(), "blink".to_string())),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);

    let err = relay_action_handler(
        State(state.clone()),
        Path(("attic".to_string(), "on".to_string())),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);

    let err = relay_action_handler(
        State(state.clone()),
        Path(("in".to_string(), "on".to_string())),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

    // Nothing listens behind the WiFi relay.
    let err = relay_action_handler(
        State(state),
        Path(("heater".to_string(), "on".to_string())),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_sensor_listing_before_and_after_poll() {
    let (state, backend) = create_test_state();

    let Json(response) = list_sensors_handler(State(state.clone())).await.unwrap();
    let sensors = response.data.unwrap();
    assert!(matches!(sensors["in"], SensorEntry::Unavailable("N/A")));

    backend.chip(0x44).set_failure(Some("nack"));
    state.controller.poll_once().await;

    let Json(response) = list_sensors_handler(State(state)).await.unwrap();
    let value = serde_json::to_value(response.data.unwrap()).unwrap();
    assert_eq!(value["in"]["temperature"], "21.37");
    assert_eq!(value["in"]["humidity"], "40.50");
    assert_eq!(value["in"]["pressure"], "1013.00");
    assert_eq!(value["under"], "N/A");
}

#[tokio::test]
async fn test_get_sensor_values() {
    let (state, _backend) = create_test_state();

    let err = get_sensor_handler(State(state.clone()), Path("in".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

    state.controller.poll_once().await;
    let Json(response) = get_sensor_handler(State(state.clone()), Path("in".to_string()))
        .await
        .unwrap();
    let values = response.data.unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values["humidity"], "40.50");

    let err = get_sensor_handler(State(state), Path("attic".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_reading_status() {
    let (state, backend) = create_test_state();

    let Json(response) = get_reading_handler(
        State(state.clone()),
        Path(("in".to_string(), "humidity".to_string())),
    )
    .await
    .unwrap();
    assert_eq!(response.data.unwrap().status, ReadingStatus::NeverRead);

    state.controller.poll_once().await;
    backend.chip(0x76).set_failure(Some("nack"));
    state.controller.poll_once().await;

    let Json(response) = get_reading_handler(
        State(state.clone()),
        Path(("in".to_string(), "humidity".to_string())),
    )
    .await
    .unwrap();
    let view = response.data.unwrap();
    assert_eq!(view.status, ReadingStatus::Stale);
    assert_eq!(view.value, Some(40.5));

    let err = get_reading_handler(
        State(state),
        Path(("in".to_string(), "relative_humidity".to_string())),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mpc_without_daemon_configured() {
    let (state, _backend) = create_test_state();
    let err = mpc_command_handler(
        State(state),
        Path("status".to_string()),
        Query(MpcQuery::default()),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
}
