//! Capability Registry
//!
//! Maps each sensor's declared capabilities to the name consumers see and
//! the calibration applied to raw readings. Built once at bootstrap and
//! read-only afterwards, so lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;


use hearth_core::{CalibrationExpr, ExprError};

use crate::error::{DeviceError, DeviceResult};

/// Correction applied to a raw reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    /// Raw value passes through unchanged.
    Identity,
    /// Compiled formula.
    Formula(Arc<CalibrationExpr>),
}

impl Calibration {
    pub fn apply(&self, raw: f64) -> Result<f64, ExprError> {
        match self {
            Calibration::Identity => Ok(raw),
            Calibration::Formula(expr) => expr.eval(raw),
        }
    }

    pub fn formula(&self) -> Option<&str> {
        match self {
            Calibration::Identity => None,
            Calibration::Formula(expr) => Some(expr.source()),
        }
    }
}

/// A declared capability after alias and calibration resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCapability {
    /// Name as declared in configuration; what the driver is asked for.
    pub declared: String,
    /// Name the reading is published under.
    pub canonical: String,
    pub calibration: Calibration,
}

impl ResolvedCapability {
    /// Apply the calibration, attributing failures to `device`.
    pub fn calibrate(&self, device: &str, raw: f64) -> DeviceResult<f64> {
        self.calibration.apply(raw).map_err(|e| match e {
            ExprError::DivisionByZero => DeviceError::DivisionByZero {
                device: device.to_string(),
                capability: self.declared.clone(),
            },
            source @ ExprError::Parse { .. } => DeviceError::CalibrationParse {
                device: device.to_string(),
                capability: self.declared.clone(),
                source,
            },
        })
    }
}

#[derive(Debug, Default)]
struct DeviceCapabilities {
    /// Declaration order.
    entries: Vec<ResolvedCapability>,
    by_declared: HashMap<String, usize>,
    by_canonical: HashMap<String, usize>,
}

/// Per-device capability table.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    devices: HashMap<String, DeviceCapabilities>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability for `device`.
    ///
    /// The formula is compiled here so that a bad formula fails bootstrap
    /// rather than the first poll.
    pub fn register(
        &mut self,
        device: &str,
        capability: &str,
        calibration: Option<&str>,
        alias: Option<&str>,
    ) -> DeviceResult<&ResolvedCapability> {
        let calibration = match calibration {
            None => Calibration::Identity,
            Some(formula) => {
                let expr = CalibrationExpr::parse(formula).map_err(|source| match source {
                    ExprError::DivisionByZero => DeviceError::DivisionByZero {
                        device: device.to_string(),
                        capability: capability.to_string(),
                    },
                    source => DeviceError::CalibrationParse {
                        device: device.to_string(),
                        capability: capability.to_string(),
                        source,
                    },
                })?;
                Calibration::Formula(Arc::new(expr))
            }
        };
        let canonical = alias.unwrap_or(capability).to_string();

        let table = self.devices.entry(device.to_string()).or_default();

        if let Some(&idx) = table.by_declared.get(capability) {
            return Err(DeviceError::CapabilityCollision {
                device: device.to_string(),
                canonical: table.entries[idx].canonical.clone(),
                first: table.entries[idx].declared.clone(),
                second: capability.to_string(),
            });
        }
        if let Some(&idx) = table.by_canonical.get(&canonical) {
            return Err(DeviceError::CapabilityCollision {
                device: device.to_string(),
                canonical,
                first: table.entries[idx].declared.clone(),
                second: capability.to_string(),
            });
        }

        let idx = table.entries.len();
        table.by_declared.insert(capability.to_string(), idx);
        table.by_canonical.insert(canonical.clone(), idx);
        table.entries.push(ResolvedCapability {
            declared: capability.to_string(),
            canonical,
            calibration,
        });
        Ok(&table.entries[idx])
    }

    /// Resolve a declared capability name.
    pub fn resolve(&self, device: &str, capability: &str) -> DeviceResult<&ResolvedCapability> {
        self.devices
            .get(device)
            .and_then(|t| t.by_declared.get(capability).map(|&i| &t.entries[i]))
            .ok_or_else(|| DeviceError::CapabilityNotFound {
                device: device.to_string(),
                capability: capability.to_string(),
            })
    }

    /// Look up by the published (canonical) name.
    pub fn resolve_canonical(&self, device: &str, canonical: &str) -> Option<&ResolvedCapability> {
        self.devices
            .get(device)
            .and_then(|t| t.by_canonical.get(canonical).map(|&i| &t.entries[i]))
    }

    /// Capabilities of `device` in declaration order.
    pub fn capabilities(&self, device: &str) -> &[ResolvedCapability] {
        self.devices
            .get(device)
            .map(|t| t.entries.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_when_no_calibration() {
        let mut registry = CapabilityRegistry::new();
        registry.register("in", "temperature", None, None).unwrap();

        let resolved = registry.resolve("in", "temperature").unwrap();
        assert_eq!(resolved.canonical, "temperature");
        assert_eq!(resolved.calibration, Calibration::Identity);
        assert_eq!(resolved.calibrate("in", 21.37).unwrap(), 21.37);
    }

    #[test]
    fn test_alias_sets_canonical_name() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register("in", "relative_humidity", None, Some("humidity"))
            .unwrap();

        let resolved = registry.resolve("in", "relative_humidity").unwrap();
        assert_eq!(resolved.canonical, "humidity");
        assert!(registry.resolve_canonical("in", "humidity").is_some());
        assert!(registry.resolve_canonical("in", "relative_humidity").is_none());
    }

    #[test]
    fn test_formula_compiled_once_and_applied() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register("under", "temperature", Some("{} - 10"), None)
            .unwrap();
        let resolved = registry.resolve("under", "temperature").unwrap();
        assert_eq!(resolved.calibration.formula(), Some("{} - 10"));
        assert_eq!(resolved.calibrate("under", 55.0).unwrap(), 45.0);
    }

    #[test]
    fn test_alias_collision_rejected() {
        let mut registry = CapabilityRegistry::new();
        registry.register("in", "humidity", None, None).unwrap();
        let err = registry
            .register("in", "relative_humidity", None, Some("humidity"))
            .unwrap_err();
        match err {
            DeviceError::CapabilityCollision {
                canonical,
                first,
                second,
                ..
            } => {
                assert_eq!(canonical, "humidity");
                assert_eq!(first, "humidity");
                assert_eq!(second, "relative_humidity");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_same_canonical_on_different_devices_is_fine() {
        let mut registry = CapabilityRegistry::new();
        registry.register("in", "temperature", None, None).unwrap();
        registry.register("out", "temperature", None, None).unwrap();
        assert_eq!(registry.capabilities("in").len(), 1);
        assert_eq!(registry.capabilities("out").len(), 1);
    }

    #[test]
    fn test_bad_formula_fails_registration() {
        let mut registry = CapabilityRegistry::new();
        let err = registry
            .register("in", "pressure", Some("{} + os.system"), None)
            .unwrap_err();
        assert!(matches!(err, DeviceError::CalibrationParse { .. }));
        assert!(err.is_bootstrap_fatal());

        let err = registry
            .register("in", "pressure", Some("{} / 0"), None)
            .unwrap_err();
        assert!(matches!(err, DeviceError::DivisionByZero { .. }));
    }

    #[test]
    fn test_runtime_division_by_zero() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register("in", "pressure", Some("1000 / {}"), None)
            .unwrap();
        let err = registry
            .resolve("in", "pressure")
            .unwrap()
            .calibrate("in", 0.0)
            .unwrap_err();
        assert!(matches!(err, DeviceError::DivisionByZero { .. }));
    }

    #[test]
    fn test_unknown_capability() {
        let registry = CapabilityRegistry::new();
        assert!(matches!(
            registry.resolve("in", "co2"),
            Err(DeviceError::CapabilityNotFound { .. })
        ));
        assert!(registry.capabilities("in").is_empty());
    }
}
