//! Tracking statistics accumulated over a session

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingMetrics {
    pub frames: u64,
    pub tracked: u64,
    /// Lost-frame counts keyed by failure label
    pub failures: BTreeMap<String, u64>,
    pub total_time_ms: f64,
    pub max_time_ms: f64,
}

impl TrackingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, elapsed_ms: f64) {
        self.frames += 1;
        self.tracked += 1;
        self.add_time(elapsed_ms);
    }

    pub fn record_failure(&mut self, reason: &str, elapsed_ms: f64) {
        self.frames += 1;
        *self.failures.entry(reason.to_string()).or_insert(0) += 1;
        self.add_time(elapsed_ms);
    }

    fn add_time(&mut self, elapsed_ms: f64) {
        self.total_time_ms += elapsed_ms;
        self.max_time_ms = self.max_time_ms.max(elapsed_ms);
    }

    pub fn success_rate(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.tracked as f64 / self.frames as f64
        }
    }

    pub fn mean_time_ms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.total_time_ms / self.frames as f64
        }
    }
}
