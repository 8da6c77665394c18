//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long shutdown waits for in-flight runs
    #[serde(default = "default_shutdown_timeout_secs", rename = "shutdown-timeout-secs")]
    pub shutdown_timeout_secs: u64,

    /// Number of future run times shown by `gn schedule`
    #[serde(default = "default_upcoming_runs", rename = "upcoming-runs")]
    pub upcoming_runs: usize,
}

fn default_shutdown_timeout_secs() -> u64 {
    60
}

fn default_upcoming_runs() -> usize {
    15
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            upcoming_runs: default_upcoming_runs(),
        }
    }
}

impl SchedulerConfig {
    /// Get the shutdown timeout as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
