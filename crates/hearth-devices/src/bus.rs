//! Bus Power Sequencer
//!
//! Owns the line that powers the shared I2C bus and the exclusive section
//! every bus transaction runs in. Drivers never touch either directly.
//!
//! States are `Disabled` and `Enabled`. The powered flag is only raised
//! after the line has been read back high and the settle delay has passed,
//! so a reader that sees `is_enabled() == true` may start a transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::drivers::OutputLine;
use crate::error::{DeviceError, DeviceResult};

/// Exclusive access to the I2C bus for one transaction.
pub type BusSection = OwnedMutexGuard<()>;

pub struct BusPowerSequencer {
    /// Power line; `None` when the bus is permanently powered. Holding this
    /// lock is holding the transition.
    line: Mutex<Option<Box<dyn OutputLine>>>,
    pin: Option<u32>,
    powered: AtomicBool,
    settle: Duration,
    bus: Arc<Mutex<()>>,
}

impl BusPowerSequencer {
    /// Sequencer gated by `line`. The bus starts disabled and the line is
    /// driven low.
    pub fn new(pin: u32, mut line: Box<dyn OutputLine>, settle: Duration) -> DeviceResult<Self> {
        line.write(false)
            .map_err(|e| DeviceError::PinUnavailable { pin, message: e })?;
        Ok(Self {
            line: Mutex::new(Some(line)),
            pin: Some(pin),
            powered: AtomicBool::new(false),
            settle,
            bus: Arc::new(Mutex::new(())),
        })
    }

    /// Sequencer for a bus without a power switch. Always enabled.
    pub fn always_on() -> Self {
        Self {
            line: Mutex::new(None),
            pin: None,
            powered: AtomicBool::new(true),
            settle: Duration::ZERO,
            bus: Arc::new(Mutex::new(())),
        }
    }

    pub fn power_pin(&self) -> Option<u32> {
        self.pin
    }

    pub fn is_enabled(&self) -> bool {
        self.powered.load(Ordering::Acquire)
    }

    /// Power the bus. Idempotent.
    ///
    /// Returns once the line reads back asserted and, on a Disabled to
    /// Enabled transition, the settle delay has elapsed.
    pub async fn enable(&self) -> DeviceResult<()> {
        let mut guard = self.line.lock().await;
        if self.is_enabled() {
            return Ok(());
        }
        let Some(line) = guard.as_mut() else {
            self.powered.store(true, Ordering::Release);
            return Ok(());
        };

        line.write(true).map_err(DeviceError::BusPower)?;
        let asserted = line.is_high().map_err(DeviceError::BusPower)?;
        if !asserted {
            return Err(DeviceError::BusPower(format!(
                "power line {} did not assert",
                self.pin.unwrap_or_default()
            )));
        }

        tokio::time::sleep(self.settle).await;
        self.powered.store(true, Ordering::Release);
        info!(pin = ?self.pin, settle_ms = self.settle.as_millis() as u64, "I2C bus powered");
        Ok(())
    }

    /// Cut bus power. Waits for any in-flight transaction to finish.
    pub async fn disable(&self) -> DeviceResult<()> {
        let mut guard = self.line.lock().await;
        let Some(line) = guard.as_mut() else {
            return Ok(());
        };
        if !self.is_enabled() {
            return Ok(());
        }

        let _section = self.bus.lock().await;
        self.powered.store(false, Ordering::Release);
        line.write(false).map_err(DeviceError::BusPower)?;
        debug!(pin = ?self.pin, "I2C bus unpowered");
        Ok(())
    }

    /// Enter the bus-exclusive section.
    ///
    /// The guard is owned so it can move into a blocking task and outlive
    /// a caller that gave up waiting.
    pub async fn bus_section(&self) -> BusSection {
        self.bus.clone().lock_owned().await
    }
}

impl std::fmt::Debug for BusPowerSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPowerSequencer")
            .field("pin", &self.pin)
            .field("enabled", &self.is_enabled())
            .field("settle", &self.settle)
            .finish()
    }
}
