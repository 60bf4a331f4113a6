//! Polling Scheduler
//!
//! Each cycle reads every declared capability of every sensor, applies the
//! registered calibration and writes the result into the [`ReadingCache`]
//! under the canonical name.
//!
//! Reads run concurrently, bounded by a semaphore, each under its own
//! timeout. A failing read marks only its own cache entry stale. If the I2C
//! bus cannot be powered, I2C entries are marked stale for this cycle and
//! non-bus sensors are still polled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use hearth_core::HearthConfig;

use crate::cache::ReadingCache;
use crate::capability::ResolvedCapability;
use crate::drivers::Sensor;
use crate::error::{DeviceError, DeviceResult};
use crate::registry::DeviceRegistry;

/// Timing inputs for the poll loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub read_timeout: Duration,
    pub max_concurrent_reads: usize,
    /// Cut bus power after each cycle.
    pub power_down_between_cycles: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &HearthConfig) -> Self {
        Self {
            interval: config.scheduler.poll_interval(),
            read_timeout: config.scheduler.read_timeout(),
            max_concurrent_reads: config.scheduler.max_concurrent_reads.max(1),
            power_down_between_cycles: config.system.power_down_between_cycles,
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the bus could not be powered this cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus_error: Option<String>,
}

struct ReadJob {
    sensor: Arc<dyn Sensor>,
    capability: ResolvedCapability,
}

pub struct PollingScheduler {
    registry: Arc<DeviceRegistry>,
    cache: Arc<ReadingCache>,
    settings: SchedulerSettings,
    semaphore: Arc<Semaphore>,
    cycles: AtomicU64,
    last_report: RwLock<Option<CycleReport>>,
}

impl PollingScheduler {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        cache: Arc<ReadingCache>,
        settings: SchedulerSettings,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_reads.max(1)));
        Self {
            registry,
            cache,
            settings,
            semaphore,
            cycles: AtomicU64::new(0),
            last_report: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Completed cycles since start.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    /// Poll every sensor capability once.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let bus = self.registry.bus().clone();

        let mut jobs = Vec::new();
        for sensor in self.registry.sensors() {
            for capability in self.registry.capabilities().capabilities(sensor.name()) {
                jobs.push(ReadJob {
                    sensor: sensor.clone(),
                    capability: capability.clone(),
                });
            }
        }

        let needs_bus = jobs.iter().any(|job| job.sensor.requires_bus_power());
        let mut bus_error = None;
        if needs_bus {
            if let Err(e) = bus.enable().await {
                error!(error = %e, "Cannot power I2C bus, skipping bus sensors this cycle");
                bus_error = Some(e.to_string());
            }
        }

        let mut failed = 0;
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            if job.sensor.requires_bus_power() {
                if let Some(message) = &bus_error {
                    self.cache
                        .mark_stale(job.sensor.name(), &job.capability.canonical, message.clone());
                    failed += 1;
                    continue;
                }
            }
            handles.push(self.spawn_read(job));
        }

        let mut succeeded = 0;
        for outcome in join_all(handles).await {
            match outcome {
                Ok(true) => succeeded += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    error!(error = %e, "Read task panicked");
                    failed += 1;
                }
            }
        }

        if needs_bus && bus_error.is_none() && self.settings.power_down_between_cycles {
            if let Err(e) = bus.disable().await {
                warn!(error = %e, "Failed to power down I2C bus");
            }
        }

        let report = CycleReport {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            succeeded,
            failed,
            bus_error,
        };
        self.cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_report.write() = Some(report.clone());

        debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "Poll cycle complete"
        );
        report
    }

    /// Read, calibrate and cache one capability. The task resolves to
    /// whether the read succeeded.
    fn spawn_read(&self, job: ReadJob) -> JoinHandle<bool> {
        let semaphore = self.semaphore.clone();
        let cache = self.cache.clone();
        let read_timeout = self.settings.read_timeout;

        tokio::spawn(async move {
            let ReadJob { sensor, capability } = job;
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!(sensor = %sensor.name(), "Read semaphore closed");
                    return false;
                }
            };

            match read_calibrated(sensor.as_ref(), &capability, read_timeout).await {
                Ok(value) => {
                    cache.record(sensor.name(), &capability.canonical, value);
                    true
                }
                Err(e) => {
                    warn!(
                        sensor = %sensor.name(),
                        capability = %capability.canonical,
                        error = %e,
                        "Sensor read failed, marking stale"
                    );
                    cache.mark_stale(sensor.name(), &capability.canonical, e.to_string());
                    false
                }
            }
        })
    }

    /// Run the loop on the current runtime until the handle is shut down.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.settings.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Polling scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!(cycles = self.cycles(), "Polling scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Read one capability under a deadline and apply its calibration.
pub async fn read_calibrated(
    sensor: &dyn Sensor,
    capability: &ResolvedCapability,
    read_timeout: Duration,
) -> DeviceResult<f64> {
    let raw = match tokio::time::timeout(read_timeout, sensor.read_raw(&capability.declared)).await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(DeviceError::DriverTimeout {
                device: sensor.name().to_string(),
                timeout: read_timeout,
            })
        }
    };
    capability.calibrate(sensor.name(), raw)
}

/// Control handle for a running scheduler loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop. An in-flight cycle may finish within `grace`;
    /// otherwise it is abandoned. Returns whether the loop exited cleanly.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        let _ = self.shutdown.send(true);
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "Poll cycle abandoned at shutdown");
                self.task.abort();
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
