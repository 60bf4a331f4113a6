//! Reading Cache
//!
//! Last known good value per (sensor, canonical capability). Written by the
//! polling scheduler, read by anyone. Readers never wait for a poll: they get
//! whatever is cached together with its status.
//!
//! Entries appear on the first successful read and are never removed. A
//! failed refresh keeps the value and flags the entry stale.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    /// Time of the last successful read.
    pub timestamp: DateTime<Utc>,
    pub stale: bool,
    /// Why the most recent refresh failed, while stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Distinguishes the three states a consumer can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    NeverRead,
    Fresh,
    Stale,
}

/// Answer to a `get_reading` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingView {
    pub sensor: String,
    pub capability: String,
    pub status: ReadingStatus,
    pub value: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReadingView {
    fn never_read(sensor: &str, capability: &str, error: Option<String>) -> Self {
        Self {
            sensor: sensor.to_string(),
            capability: capability.to_string(),
            status: ReadingStatus::NeverRead,
            value: None,
            timestamp: None,
            stale: false,
            error,
        }
    }

    fn from_reading(sensor: &str, capability: &str, reading: Reading) -> Self {
        Self {
            sensor: sensor.to_string(),
            capability: capability.to_string(),
            status: if reading.stale {
                ReadingStatus::Stale
            } else {
                ReadingStatus::Fresh
            },
            value: Some(reading.value),
            timestamp: Some(reading.timestamp),
            stale: reading.stale,
            error: reading.error,
        }
    }
}

type Key = (String, String);

fn key(sensor: &str, capability: &str) -> Key {
    (sensor.to_string(), capability.to_string())
}

#[derive(Debug, Default)]
pub struct ReadingCache {
    entries: DashMap<Key, Reading>,
    /// Failures for keys that have never been read successfully.
    first_errors: DashMap<Key, String>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh value.
    pub fn record(&self, sensor: &str, capability: &str, value: f64) {
        self.record_at(sensor, capability, value, Utc::now());
    }

    pub fn record_at(&self, sensor: &str, capability: &str, value: f64, timestamp: DateTime<Utc>) {
        let key = key(sensor, capability);
        self.first_errors.remove(&key);
        self.entries.insert(
            key,
            Reading {
                value,
                timestamp,
                stale: false,
                error: None,
            },
        );
    }

    /// Flag an entry stale, keeping its value. Returns whether a previous
    /// good value exists.
    pub fn mark_stale(&self, sensor: &str, capability: &str, error: impl Into<String>) -> bool {
        let key = key(sensor, capability);
        let error = error.into();
        match self.entries.get_mut(&key) {
            Some(mut entry) => {
                entry.stale = true;
                entry.error = Some(error);
                true
            }
            None => {
                self.first_errors.insert(key, error);
                false
            }
        }
    }

    pub fn get(&self, sensor: &str, capability: &str) -> Option<Reading> {
        self.entries
            .get(&key(sensor, capability))
            .map(|entry| entry.value().clone())
    }

    /// Cached state of one capability, including the never-read case.
    pub fn lookup(&self, sensor: &str, capability: &str) -> ReadingView {
        match self.get(sensor, capability) {
            Some(reading) => ReadingView::from_reading(sensor, capability, reading),
            None => {
                let error = self
                    .first_errors
                    .get(&key(sensor, capability))
                    .map(|e| e.value().clone());
                ReadingView::never_read(sensor, capability, error)
            }
        }
    }

    /// All cached capabilities of `sensor`, sorted by name.
    pub fn sensor_readings(&self, sensor: &str) -> Vec<(String, Reading)> {
        let mut readings: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == sensor)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        readings.sort_by(|a, b| a.0.cmp(&b.0));
        readings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_observable_states() {
        let cache = ReadingCache::new();
        assert_eq!(cache.lookup("in", "temperature").status, ReadingStatus::NeverRead);

        cache.record("in", "temperature", 21.0);
        let view = cache.lookup("in", "temperature");
        assert_eq!(view.status, ReadingStatus::Fresh);
        assert_eq!(view.value, Some(21.0));

        assert!(cache.mark_stale("in", "temperature", "timeout"));
        let view = cache.lookup("in", "temperature");
        assert_eq!(view.status, ReadingStatus::Stale);
        assert_eq!(view.value, Some(21.0));
        assert_eq!(view.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_failure_before_first_read_creates_no_entry() {
        let cache = ReadingCache::new();
        assert!(!cache.mark_stale("out", "pressure", "nack"));
        assert!(cache.is_empty());

        let view = cache.lookup("out", "pressure");
        assert_eq!(view.status, ReadingStatus::NeverRead);
        assert_eq!(view.error.as_deref(), Some("nack"));

        cache.record("out", "pressure", 1001.0);
        assert!(cache.lookup("out", "pressure").error.is_none());
    }

    #[test]
    fn test_recovery_clears_stale() {
        let cache = ReadingCache::new();
        cache.record("in", "humidity", 40.0);
        cache.mark_stale("in", "humidity", "nack");
        cache.record("in", "humidity", 42.0);

        let reading = cache.get("in", "humidity").unwrap();
        assert!(!reading.stale);
        assert_eq!(reading.value, 42.0);
        assert!(reading.error.is_none());
    }

    #[test]
    fn test_sensor_readings_sorted() {
        let cache = ReadingCache::new();
        cache.record("in", "temperature", 21.0);
        cache.record("in", "humidity", 40.0);
        cache.record("under", "temperature", 19.0);

        let names: Vec<_> = cache
            .sensor_readings("in")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["humidity", "temperature"]);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ReadingStatus::NeverRead).unwrap();
        assert_eq!(json, "\"never_read\"");
    }
}
