//! Relay on a GPIO output line.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use hearth_core::Attrs;

use crate::error::{DeviceError, DeviceResult};
use crate::model::{DeviceType, RelayState};

use super::{OutputLine, Relay};

/// A relay driven directly by a digital output.
///
/// Most relay boards switch on a low level, so lines are active-low unless
/// `active_low = false` is configured.
pub struct GpioRelay {
    name: String,
    pin: u32,
    active_low: bool,
    attrs: Attrs,
    line: Mutex<Box<dyn OutputLine>>,
}

impl GpioRelay {
    pub fn new(
        name: impl Into<String>,
        pin: u32,
        active_low: bool,
        attrs: Attrs,
        line: Box<dyn OutputLine>,
    ) -> Self {
        Self {
            name: name.into(),
            pin,
            active_low,
            attrs,
            line: Mutex::new(line),
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn level_for(&self, state: RelayState) -> bool {
        state.is_on() != self.active_low
    }

    fn state_for(&self, level: bool) -> RelayState {
        RelayState::from(level != self.active_low)
    }

    fn line_error(&self, message: String) -> DeviceError {
        DeviceError::PinUnavailable {
            pin: self.pin,
            message,
        }
    }
}

#[async_trait]
impl Relay for GpioRelay {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Gpio
    }

    fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    async fn set_state(&self, state: RelayState) -> DeviceResult<()> {
        let mut line = self.line.lock();
        let level = line.is_high().map_err(|e| self.line_error(e))?;
        if self.state_for(level) == state {
            debug!(relay = %self.name, state = %state, "Relay already in requested state");
            return Ok(());
        }
        line.write(self.level_for(state))
            .map_err(|e| self.line_error(e))?;
        debug!(relay = %self.name, pin = self.pin, state = %state, "Relay switched");
        Ok(())
    }

    async fn get_state(&self) -> DeviceResult<RelayState> {
        let level = self.line.lock().is_high().map_err(|e| self.line_error(e))?;
        Ok(self.state_for(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulated::SimulatedLine;

    fn relay(active_low: bool) -> (GpioRelay, SimulatedLine) {
        let line = SimulatedLine::new();
        let relay = GpioRelay::new(
            "display",
            23,
            active_low,
            Attrs::new(),
            Box::new(line.clone()),
        );
        (relay, line)
    }

    #[tokio::test]
    async fn test_active_low_levels() {
        let (relay, line) = relay(true);
        // Low level reads as on for an active-low line.
        assert_eq!(relay.get_state().await.unwrap(), RelayState::On);

        relay.turn_off().await.unwrap();
        assert!(line.level());
        assert_eq!(relay.get_state().await.unwrap(), RelayState::Off);

        relay.turn_on().await.unwrap();
        assert!(!line.level());
    }

    #[tokio::test]
    async fn test_active_high_levels() {
        let (relay, line) = relay(false);
        relay.turn_on().await.unwrap();
        assert!(line.level());
        assert_eq!(relay.get_state().await.unwrap(), RelayState::On);
    }

    #[tokio::test]
    async fn test_unchanged_state_skips_write() {
        let (relay, line) = relay(false);
        relay.turn_on().await.unwrap();
        relay.turn_on().await.unwrap();
        assert_eq!(line.writes(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_reported() {
        let (relay, line) = relay(false);
        line.set_failing(true);
        let err = relay.turn_on().await.unwrap_err();
        assert!(matches!(err, DeviceError::PinUnavailable { pin: 23, .. }));
    }
}
