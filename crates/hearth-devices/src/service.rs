//! Controller - single entry point for consumers
//!
//! Owns the device registry, the reading cache, the polling scheduler, the
//! command dispatcher and the optional MPD client. The HTTP API and the CLI
//! only talk to this type.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use hearth_core::HearthConfig;

use crate::cache::{ReadingCache, ReadingView};
use crate::dispatcher::{CommandDispatcher, RelayAck, RelayInfo};
use crate::drivers::{Device, DriverBackend};
use crate::error::{DeviceError, DeviceResult};
use crate::model::RelayState;
use crate::mpd::MpdClient;
use crate::registry::DeviceRegistry;
use crate::scheduler::{CycleReport, PollingScheduler, SchedulerHandle, SchedulerSettings};

/// Render a reading the way listings show it.
pub fn format_value(value: f64) -> String {
    format!("{:.2}", value)
}

/// Controller summary for health checks.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub relays: usize,
    pub sensors: usize,
    pub cached_readings: usize,
    pub bus_powered: bool,
    pub polling: bool,
    pub cycles: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleReport>,
    pub mpd: bool,
}

pub struct Controller {
    registry: Arc<DeviceRegistry>,
    cache: Arc<ReadingCache>,
    scheduler: Arc<PollingScheduler>,
    dispatcher: CommandDispatcher,
    mpd: Option<MpdClient>,
    polling: Mutex<Option<SchedulerHandle>>,
    shutdown_grace: Duration,
}

impl Controller {
    /// Build every device and component from `config`.
    ///
    /// Fails on any bootstrap-fatal error; the controller never starts with
    /// a partial registry.
    pub fn bootstrap(config: &HearthConfig, backend: &dyn DriverBackend) -> DeviceResult<Self> {
        let registry = Arc::new(DeviceRegistry::bootstrap(config, backend)?);
        let cache = Arc::new(ReadingCache::new());
        let scheduler = Arc::new(PollingScheduler::new(
            registry.clone(),
            cache.clone(),
            SchedulerSettings::from_config(config),
        ));
        let dispatcher = CommandDispatcher::new(registry.clone(), config.scheduler.read_timeout());
        let mpd = config.mpd.as_ref().map(MpdClient::new);

        info!(
            devices = registry.len(),
            mpd = ?mpd.as_ref().map(|m| m.addr().to_string()),
            "Controller bootstrapped"
        );

        Ok(Self {
            registry,
            cache,
            scheduler,
            dispatcher,
            mpd,
            polling: Mutex::new(None),
            shutdown_grace: config.scheduler.shutdown_grace(),
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ReadingCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<PollingScheduler> {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn mpd(&self) -> Option<&MpdClient> {
        self.mpd.as_ref()
    }

    fn sensor_exists(&self, sensor: &str) -> DeviceResult<()> {
        match self.registry.get(sensor) {
            Some(Device::Sensor(_)) => Ok(()),
            _ => Err(DeviceError::DeviceNotFound(sensor.to_string())),
        }
    }

    /// Latest cached reading of a sensor capability, addressed by its
    /// canonical name. Never waits for a poll.
    pub fn get_reading(&self, sensor: &str, capability: &str) -> DeviceResult<ReadingView> {
        self.sensor_exists(sensor)?;
        if self
            .registry
            .capabilities()
            .resolve_canonical(sensor, capability)
            .is_none()
        {
            return Err(DeviceError::CapabilityNotFound {
                device: sensor.to_string(),
                capability: capability.to_string(),
            });
        }
        Ok(self.cache.lookup(sensor, capability))
    }

    /// Every declared capability of `sensor`, under canonical names.
    pub fn sensor_values(&self, sensor: &str) -> DeviceResult<Vec<ReadingView>> {
        self.sensor_exists(sensor)?;
        Ok(self
            .registry
            .capabilities()
            .capabilities(sensor)
            .iter()
            .map(|c| self.cache.lookup(sensor, &c.canonical))
            .collect())
    }

    pub fn sensor_names(&self) -> Vec<&str> {
        self.registry.sensors().map(|s| s.name()).collect()
    }

    pub async fn set_relay(&self, name: &str, state: RelayState) -> DeviceResult<RelayAck> {
        self.dispatcher.set_relay(name, state).await
    }

    pub async fn toggle_relay(&self, name: &str) -> DeviceResult<RelayAck> {
        self.dispatcher.toggle(name).await
    }

    pub async fn relay_state(&self, name: &str) -> DeviceResult<RelayState> {
        self.dispatcher.get_state(name).await
    }

    pub async fn relay_info(&self, name: &str) -> DeviceResult<RelayInfo> {
        self.dispatcher.relay_info(name).await
    }

    pub async fn relay_infos(&self) -> Vec<(String, DeviceResult<RelayInfo>)> {
        self.dispatcher.relay_infos().await
    }

    /// Run a single poll cycle now.
    pub async fn poll_once(&self) -> CycleReport {
        self.scheduler.run_cycle().await
    }

    /// Start the background poll loop. Returns `false` if already running.
    pub fn start_polling(&self) -> bool {
        let mut polling = self.polling.lock();
        if polling.is_some() {
            return false;
        }
        *polling = Some(self.scheduler.clone().spawn());
        true
    }

    pub fn is_polling(&self) -> bool {
        self.polling
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop polling using the configured grace period.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_with_grace(self.shutdown_grace).await
    }

    /// Stop polling; an in-flight cycle gets `grace` to finish. Returns
    /// whether everything stopped cleanly.
    pub async fn shutdown_with_grace(&self, grace: Duration) -> bool {
        let handle = self.polling.lock().take();
        let clean = match handle {
            Some(handle) => handle.shutdown(grace).await,
            None => true,
        };
        info!(clean, "Controller shut down");
        clean
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            relays: self.registry.relays().count(),
            sensors: self.registry.sensors().count(),
            cached_readings: self.cache.len(),
            bus_powered: self.registry.bus().is_enabled(),
            polling: self.is_polling(),
            cycles: self.scheduler.cycles(),
            last_cycle: self.scheduler.last_report(),
            mpd: self.mpd.is_some(),
        }
    }
}
