//! ==============================================================================
//! store.rs - in-memory reading store
//! ==============================================================================
//!
//! purpose:
//!     keeps every reading the bridge accepts, grouped by device, for the
//!     lifetime of the process. there is no eviction and no persistence;
//!     growth is unbounded.
//!
//! ordering:
//!     every query returns newest first: timestamp descending, then id
//!     descending. ids grow with insertion order, so two readings stamped in
//!     the same instant come back latest-inserted first.
//!
//! relationships:
//!     - written by: bridge.rs (append on each valid telemetry message)
//!     - read by: bridge.rs (viewer history), api.rs (rest queries)
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::{Reading, ValidTelemetry};
use crate::error::StoreError;

/// default `limit` for recent() when the caller gives none
pub const DEFAULT_RECENT_LIMIT: usize = 50;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    by_device: HashMap<String, Vec<Reading>>,
}

pub struct ReadingStore {
    inner: RwLock<Inner>,
    clock: Clock,
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// store whose timestamps come from `clock` instead of the wall clock
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                by_device: HashMap::new(),
            }),
            clock: Box::new(clock),
        }
    }

    /// assign id + timestamp, store, and hand back the stored copy
    pub fn append(
        &self,
        device_id: &str,
        dht_temperature: f64,
        lm35_temperature: f64,
        led_level: u8,
    ) -> Result<Reading, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let reading = Reading {
            id: inner.next_id,
            device_id: device_id.to_string(),
            dht_temperature,
            lm35_temperature,
            led_level,
            timestamp: (self.clock)(),
        };
        inner.next_id += 1;

        inner
            .by_device
            .entry(device_id.to_string())
            .or_default()
            .push(reading.clone());

        Ok(reading)
    }

    pub fn append_telemetry(
        &self,
        device_id: &str,
        telemetry: ValidTelemetry,
    ) -> Result<Reading, StoreError> {
        self.append(
            device_id,
            telemetry.dht_temperature,
            telemetry.lm35_temperature,
            telemetry.led_level,
        )
    }

    /// newest `limit` readings for a device
    pub fn recent(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>, StoreError> {
        let mut readings = self.collect(device_id, |_| true)?;
        readings.truncate(limit);
        Ok(readings)
    }

    /// readings with `start <= timestamp <= end`, newest first
    pub fn by_time_range(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        self.collect(device_id, |r| start <= r.timestamp && r.timestamp <= end)
    }

    /// total readings across all devices
    pub fn len(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.by_device.values().map(Vec::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn device_count(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.by_device.len())
    }

    fn collect<F>(&self, device_id: &str, keep: F) -> Result<Vec<Reading>, StoreError>
    where
        F: Fn(&Reading) -> bool,
    {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;

        let mut readings: Vec<Reading> = inner
            .by_device
            .get(device_id)
            .map(|all| all.iter().filter(|r| keep(r)).cloned().collect())
            .unwrap_or_default();

        readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(readings)
    }
}
