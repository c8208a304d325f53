//! Forwarding engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine tuning supplied at construction; immutable for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Delay between polls of the pending-upload table.
    pub poll_interval_ms: u64,
    /// Number of network workers.
    pub worker_count: usize,
    /// Capacity of the poller → worker queue.
    pub forwarding_queue_capacity: usize,
    /// Capacity of the worker → DB writer queue.
    pub db_write_queue_capacity: usize,
    /// Timeout used by the owning service when it stops the engine.
    pub shutdown_timeout_ms: u64,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            worker_count: 4,
            forwarding_queue_capacity: 64,
            db_write_queue_capacity: 64,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ForwardingConfig {
    /// Parses a JSON object; missing keys take their defaults.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".to_string());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be at least 1".to_string());
        }
        if self.forwarding_queue_capacity == 0 {
            return Err("forwarding_queue_capacity must be at least 1".to_string());
        }
        if self.db_write_queue_capacity == 0 {
            return Err("db_write_queue_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}
