//! Listener timing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing for the log-filter polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListenerConfig {
    /// Pause between sweeps after a sweep with at least one successful poll.
    #[serde(default = "default_poll_interval_ms", alias = "poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// First pause after a sweep in which every poll failed.
    #[serde(default = "default_error_backoff_ms", alias = "error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Cap for the doubling error backoff.
    #[serde(default = "default_max_backoff_ms", alias = "max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Re-create a filter the node reports as unknown.
    #[serde(default = "bool_true", alias = "resubscribe_lost_filters")]
    pub resubscribe_lost_filters: bool,
}

fn default_poll_interval_ms() -> u64 { 500 }
fn default_error_backoff_ms() -> u64 { 5_000 }
fn default_max_backoff_ms() -> u64 { 60_000 }
fn bool_true() -> bool { true }

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            resubscribe_lost_filters: true,
        }
    }
}

impl ListenerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Timing and range for the block listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlockListenerConfig {
    #[serde(default = "default_block_polling_ms", alias = "polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// First block to publish. `None` starts at the current head.
    #[serde(default, alias = "start_block")]
    pub start_block: Option<u64>,
    #[serde(default = "default_max_blocks_per_sweep", alias = "max_blocks_per_sweep")]
    pub max_blocks_per_sweep: u64,
    #[serde(default = "default_error_backoff_ms", alias = "error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms", alias = "max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_block_polling_ms() -> u64 { 1_000 }
fn default_max_blocks_per_sweep() -> u64 { 100 }

impl Default for BlockListenerConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_block_polling_ms(),
            start_block: None,
            max_blocks_per_sweep: default_max_blocks_per_sweep(),
            error_backoff_ms: default_error_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}
