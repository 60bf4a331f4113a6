//! Router tests over the full middleware stack.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use hearth_api::create_router_with_state;

use common::create_test_state;

async fn call(method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let (state, _backend) = create_test_state();
    state.controller.poll_once().await;
    let app = create_router_with_state(state);

    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_reading_route() {
    let (status, body) = call("GET", "/api/sensor/in/pressure").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "fresh");
    assert_eq!(body["data"]["value"], 1013.0);
}

#[tokio::test]
async fn test_relay_action_accepts_post() {
    let (status, body) = call("POST", "/api/relay/display/off").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["relay"], "display");
    assert_eq!(body["data"]["state"], "off");
}

#[tokio::test]
async fn test_error_body_shape() {
    let (status, body) = call("GET", "/api/relay/attic").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
