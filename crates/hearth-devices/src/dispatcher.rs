//! Command Dispatcher
//!
//! Routes relay commands to drivers. Every relay has its own lane: commands
//! to one relay run one at a time in arrival order, commands to different
//! relays run in parallel. Failures are returned to the caller as-is and
//! never retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use hearth_core::Attrs;

use crate::drivers::{Device, Relay};
use crate::error::{DeviceError, DeviceResult};
use crate::model::{DeviceType, RelayState};
use crate::registry::DeviceRegistry;

/// Successful command acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayAck {
    pub relay: String,
    pub state: RelayState,
}

/// Relay description with its current state.
#[derive(Debug, Clone, Serialize)]
pub struct RelayInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(flatten)]
    pub attrs: Attrs,
    pub state: RelayState,
}

pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
    lanes: HashMap<String, Arc<Mutex<()>>>,
    command_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, command_timeout: Duration) -> Self {
        let lanes = registry
            .relays()
            .map(|r| (r.name().to_string(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            registry,
            lanes,
            command_timeout,
        }
    }

    fn relay(&self, name: &str) -> DeviceResult<(Arc<dyn Relay>, Arc<Mutex<()>>)> {
        match self.registry.get(name) {
            None => Err(DeviceError::DeviceNotFound(name.to_string())),
            Some(Device::Sensor(_)) => Err(DeviceError::NotARelay(name.to_string())),
            Some(Device::Relay(relay)) => {
                let lane = self
                    .lanes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?;
                Ok((relay.clone(), lane))
            }
        }
    }

    async fn with_deadline<T, F>(&self, name: &str, fut: F) -> DeviceResult<T>
    where
        F: std::future::Future<Output = DeviceResult<T>>,
    {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| DeviceError::DriverTimeout {
                device: name.to_string(),
                timeout: self.command_timeout,
            })?
    }

    /// Drive `name` to `state`.
    pub async fn set_relay(&self, name: &str, state: RelayState) -> DeviceResult<RelayAck> {
        let (relay, lane) = self.relay(name)?;
        let _lane = lane.lock().await;

        match self.with_deadline(name, relay.set_state(state)).await {
            Ok(()) => {
                info!(relay = %name, state = %state, "Relay set");
                Ok(RelayAck {
                    relay: name.to_string(),
                    state,
                })
            }
            Err(e) => {
                warn!(relay = %name, state = %state, error = %e, "Relay command failed");
                Err(e)
            }
        }
    }

    /// Invert the current state of `name`.
    pub async fn toggle(&self, name: &str) -> DeviceResult<RelayAck> {
        let (relay, lane) = self.relay(name)?;
        let _lane = lane.lock().await;

        let target = self
            .with_deadline(name, async {
                let current = relay.get_state().await?;
                let target = current.inverse();
                relay.set_state(target).await?;
                Ok(target)
            })
            .await
            .inspect_err(|e| warn!(relay = %name, error = %e, "Relay toggle failed"))?;

        info!(relay = %name, state = %target, "Relay toggled");
        Ok(RelayAck {
            relay: name.to_string(),
            state: target,
        })
    }

    /// Query the physical state of `name`.
    pub async fn get_state(&self, name: &str) -> DeviceResult<RelayState> {
        let (relay, lane) = self.relay(name)?;
        let _lane = lane.lock().await;
        self.with_deadline(name, relay.get_state()).await
    }

    pub async fn relay_info(&self, name: &str) -> DeviceResult<RelayInfo> {
        let (relay, _) = self.relay(name)?;
        let state = self.get_state(name).await?;
        Ok(RelayInfo {
            name: relay.name().to_string(),
            device_type: relay.device_type(),
            attrs: relay.attrs().clone(),
            state,
        })
    }

    /// Info for every relay in configuration order. Relays that cannot be
    /// queried carry their error instead of failing the whole listing.
    pub async fn relay_infos(&self) -> Vec<(String, DeviceResult<RelayInfo>)> {
        let names: Vec<String> = self.registry.relays().map(|r| r.name().to_string()).collect();
        let infos = futures::future::join_all(names.iter().map(|n| self.relay_info(n))).await;
        names.into_iter().zip(infos).collect()
    }
}
