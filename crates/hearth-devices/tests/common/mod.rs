//! Fake WiFi relay endpoint for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

#[derive(Default)]
pub struct FakeRelayState {
    pub on: AtomicBool,
    /// `state` field of every command body, in arrival order.
    pub commands: Mutex<Vec<String>>,
    /// HTTP method of every command.
    pub methods: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub delay: Mutex<Duration>,
    pub fail_with: Mutex<Option<StatusCode>>,
}

pub struct FakeRelay {
    pub url: String,
    pub state: Arc<FakeRelayState>,
}

impl FakeRelay {
    pub async fn start() -> Self {
        let state = Arc::new(FakeRelayState::default());
        let app = Router::new()
            .route("/relay", get(read_state).put(command).post(command))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}/relay", addr),
            state,
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    pub fn fail_with(&self, status: Option<StatusCode>) {
        *self.state.fail_with.lock() = status;
    }

    pub fn is_on(&self) -> bool {
        self.state.on.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

async fn read_state(State(state): State<Arc<FakeRelayState>>) -> (StatusCode, Json<Value>) {
    if let Some(status) = *state.fail_with.lock() {
        return (status, Json(json!({ "error": "fault" })));
    }
    let on = state.on.load(Ordering::SeqCst);
    (StatusCode::OK, Json(json!({ "state": on as u8 })))
}

async fn command(
    State(state): State<Arc<FakeRelayState>>,
    method: axum::http::Method,
    Form(body): Form<HashMap<String, String>>,
) -> StatusCode {
    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let value = body.get("state").cloned().unwrap_or_default();
    state.commands.lock().push(value.clone());
    state.methods.lock().push(method.to_string());
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    if let Some(status) = *state.fail_with.lock() {
        return status;
    }
    state.on.store(value == "1", Ordering::SeqCst);
    StatusCode::OK
}
