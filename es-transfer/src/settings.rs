//! Tunables of the transfer pipeline.
//!
//! All durations are stored in milliseconds so the struct deserializes from
//! a plain JSON settings file; use the accessors to get `Duration`s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// A starved stream reports buffering only while its last pts is within
    /// this distance of the playback clock.
    /// Default: 500 ms.
    pub buffering_threshold_ms: u64,

    /// How far a stream may run ahead of the slowest active stream.
    /// Default: 500 ms.
    pub sync_tolerance_ms: u64,

    /// Backoff after the sink reports it is not prepared.
    /// Default: 1000 ms.
    pub not_prepared_retry_ms: u64,

    /// Backoff after the sink reports its input buffer is full.
    /// Default: 500 ms.
    pub full_retry_ms: u64,

    /// Capacity of each stream's event channel. Slow subscribers past this
    /// lag lose the oldest events.
    /// Default: 256.
    pub event_capacity: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            buffering_threshold_ms: 500,
            sync_tolerance_ms: 500,
            not_prepared_retry_ms: 1_000,
            full_retry_ms: 500,
            event_capacity: 256,
        }
    }
}

impl TransferSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffering_threshold(mut self, threshold: Duration) -> Self {
        self.buffering_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_sync_tolerance(mut self, tolerance: Duration) -> Self {
        self.sync_tolerance_ms = tolerance.as_millis() as u64;
        self
    }

    pub fn with_retry_delays(mut self, not_prepared: Duration, full: Duration) -> Self {
        self.not_prepared_retry_ms = not_prepared.as_millis() as u64;
        self.full_retry_ms = full.as_millis() as u64;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn buffering_threshold(&self) -> Duration {
        Duration::from_millis(self.buffering_threshold_ms)
    }

    pub fn sync_tolerance(&self) -> Duration {
        Duration::from_millis(self.sync_tolerance_ms)
    }

    pub fn not_prepared_delay(&self) -> Duration {
        Duration::from_millis(self.not_prepared_retry_ms)
    }

    pub fn full_delay(&self) -> Duration {
        Duration::from_millis(self.full_retry_ms)
    }
}
