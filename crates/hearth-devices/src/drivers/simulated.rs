//! In-memory hardware.
//!
//! Lines and chips are shared handles: tests keep a clone, the drivers own
//! another, and both observe the same state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin, StatefulOutputPin};
use parking_lot::Mutex;

use crate::error::{DeviceError, DeviceResult};
use crate::model::{capabilities, ChipKind};

use super::{DriverBackend, OutputLine, SensorChip};

/// Fault injected into a simulated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedFault;

impl digital::Error for SimulatedFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

#[derive(Debug, Default)]
struct LineState {
    high: bool,
    writes: u64,
    failing: bool,
    /// Level reported back regardless of writes.
    stuck: Option<bool>,
}

/// A GPIO output line held in memory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedLine {
    state: Arc<Mutex<LineState>>,
}

impl SimulatedLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current electrical level.
    pub fn level(&self) -> bool {
        let state = self.state.lock();
        state.stuck.unwrap_or(state.high)
    }

    /// Number of writes that reached the line.
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    /// Make every subsequent write fail.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Pin the read-back level, as a shorted line would.
    pub fn set_stuck(&self, level: Option<bool>) {
        self.state.lock().stuck = level;
    }

    /// Configure as output at `high`. Not counted as a write.
    fn claim(&self, high: bool) {
        self.state.lock().high = high;
    }
}

impl ErrorType for SimulatedLine {
    type Error = SimulatedFault;
}

impl OutputPin for SimulatedLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(SimulatedFault);
        }
        state.high = false;
        state.writes += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(SimulatedFault);
        }
        state.high = true;
        state.writes += 1;
        Ok(())
    }
}

impl StatefulOutputPin for SimulatedLine {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level())
    }
}

#[derive(Debug, Default)]
struct ChipState {
    values: HashMap<String, f64>,
    failure: Option<String>,
    latency: Option<Duration>,
    transactions: u64,
}

/// A sensor chip held in memory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedChip {
    state: Arc<Mutex<ChipState>>,
}

impl SimulatedChip {
    /// Set the raw value returned for `capability`.
    pub fn set_value(&self, capability: &str, value: f64) {
        let key = canonical_quantity(capability);
        self.state.lock().values.insert(key.to_string(), value);
    }

    /// Fail every transaction with `message`, or clear the failure.
    pub fn set_failure(&self, message: Option<&str>) {
        self.state.lock().failure = message.map(str::to_string);
    }

    /// Block each transaction for `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Number of bus transactions attempted.
    pub fn transactions(&self) -> u64 {
        self.state.lock().transactions
    }

    fn transact(&self, capability: &str) -> Result<f64, String> {
        let latency = {
            let mut state = self.state.lock();
            state.transactions += 1;
            state.latency
        };
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }

        let state = self.state.lock();
        if let Some(message) = &state.failure {
            return Err(message.clone());
        }
        let key = canonical_quantity(capability);
        Ok(state
            .values
            .get(key)
            .copied()
            .unwrap_or_else(|| default_value(key)))
    }
}

fn canonical_quantity(capability: &str) -> &str {
    if capability == capabilities::HUMIDITY {
        capabilities::RELATIVE_HUMIDITY
    } else {
        capability
    }
}

fn default_value(capability: &str) -> f64 {
    match capability {
        capabilities::TEMPERATURE => 21.5,
        capabilities::RELATIVE_HUMIDITY => 45.0,
        capabilities::PRESSURE => 1013.25,
        _ => 0.0,
    }
}

struct BoundChip {
    kind: ChipKind,
    chip: SimulatedChip,
}

impl SensorChip for BoundChip {
    fn kind(&self) -> ChipKind {
        self.kind
    }

    fn read(&mut self, capability: &str) -> Result<f64, String> {
        self.chip.transact(capability)
    }
}

#[derive(Default)]
struct Inventory {
    lines: HashMap<u32, SimulatedLine>,
    chips: HashMap<u8, SimulatedChip>,
    unavailable_pins: HashSet<u32>,
}

/// Backend that hands out simulated lines and chips.
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    inventory: Arc<Mutex<Inventory>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the line on `pin`, created on first use.
    pub fn line(&self, pin: u32) -> SimulatedLine {
        self.inventory.lock().lines.entry(pin).or_default().clone()
    }

    /// Shared handle to the chip at `address`, created on first use.
    pub fn chip(&self, address: u8) -> SimulatedChip {
        self.inventory.lock().chips.entry(address).or_default().clone()
    }

    /// Refuse to hand out `pin`.
    pub fn mark_pin_unavailable(&self, pin: u32) {
        self.inventory.lock().unavailable_pins.insert(pin);
    }
}

impl DriverBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn output_line(&self, pin: u32, initial_high: bool) -> DeviceResult<Box<dyn OutputLine>> {
        if self.inventory.lock().unavailable_pins.contains(&pin) {
            return Err(DeviceError::PinUnavailable {
                pin,
                message: "line is not available".to_string(),
            });
        }
        let line = self.line(pin);
        line.claim(initial_high);
        Ok(Box::new(line))
    }

    fn sensor_chip(
        &self,
        _device: &str,
        kind: ChipKind,
        _bus: &str,
        address: u8,
    ) -> DeviceResult<Box<dyn SensorChip>> {
        Ok(Box::new(BoundChip {
            kind,
            chip: self.chip(address),
        }))
    }
}
