//! Relay behind an HTTP endpoint.
//!
//! Wire format, per relay URL:
//!
//! - `PUT url` (or `POST`) with form body `state=1` / `state=0` sets the state
//! - `GET url` returns `{"state": 0 | 1}`
//!
//! The body carries the absolute desired state, so repeating a command is
//! harmless. Failed requests are not retried: the relay state is unknown
//! after a network error and repeating a physical actuation is worse than
//! reporting it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use tracing::debug;

use hearth_core::Attrs;

use crate::error::{DeviceError, DeviceResult};
use crate::model::{DeviceType, RelayState};

use super::Relay;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct StateResponse {
    state: serde_json::Value,
}

impl StateResponse {
    fn relay_state(&self) -> Option<RelayState> {
        match &self.state {
            serde_json::Value::Bool(b) => Some(RelayState::from(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(|v| RelayState::from(v != 0)),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A relay switched over HTTP.
pub struct WifiRelay {
    name: String,
    url: String,
    method: Method,
    timeout: Duration,
    attrs: Attrs,
    client: Client,
}

impl WifiRelay {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        method: Method,
        timeout: Duration,
        attrs: Attrs,
    ) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            url: url.into(),
            method,
            timeout,
            attrs,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn network_error(&self, message: impl Into<String>) -> DeviceError {
        DeviceError::RelayNetwork {
            relay: self.name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Relay for WifiRelay {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::WiFi
    }

    fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    async fn set_state(&self, state: RelayState) -> DeviceResult<()> {
        let value = if state.is_on() { "1" } else { "0" };

        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .timeout(self.timeout)
            .form(&[("state", value)])
            .send()
            .await
            .map_err(|e| self.network_error(format!("HTTP command failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(self.network_error(format!(
                "HTTP command error: {}",
                response.status()
            )));
        }

        debug!(relay = %self.name, url = %self.url, state = %state, "Relay command accepted");
        Ok(())
    }

    async fn get_state(&self) -> DeviceResult<RelayState> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.network_error(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(self.network_error(format!("HTTP error: {}", response.status())));
        }

        let body: StateResponse = response
            .json()
            .await
            .map_err(|e| self.network_error(format!("JSON parse error: {}", e)))?;

        body.relay_state()
            .ok_or_else(|| self.network_error(format!("unrecognised state {}", body.state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_response_forms() {
        let parse = |text: &str| {
            serde_json::from_str::<StateResponse>(text)
                .unwrap()
                .relay_state()
        };
        assert_eq!(parse(r#"{"state": 1}"#), Some(RelayState::On));
        assert_eq!(parse(r#"{"state": 0}"#), Some(RelayState::Off));
        assert_eq!(parse(r#"{"state": true}"#), Some(RelayState::On));
        assert_eq!(parse(r#"{"state": "off"}"#), Some(RelayState::Off));
        assert_eq!(parse(r#"{"state": null}"#), None);
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_network_error() {
        // Nothing listens on port 9 of the loopback interface.
        let relay = WifiRelay::new(
            "heater",
            "http://127.0.0.1:9/relay",
            Method::PUT,
            Duration::from_millis(200),
            Attrs::new(),
        );
        let err = relay.turn_on().await.unwrap_err();
        assert!(matches!(err, DeviceError::RelayNetwork { .. }));
        assert!(err.is_transient());
    }
}
