//! The node interface the pipeline consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::NodeError;
use crate::types::{BlockData, LogFilter, RawLog};

/// Node-side filter handle returned by `eth_newFilter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(pub String);

impl FilterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull-style access to an Ethereum node.
///
/// Implemented over JSON-RPC by `chainevents-rpc`; tests use in-memory
/// doubles.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, NodeError>;

    /// `None` when the node does not know the block yet.
    async fn block(&self, number: u64, include_txs: bool) -> Result<Option<BlockData>, NodeError>;

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, NodeError>;

    async fn new_filter(&self, filter: &LogFilter) -> Result<FilterId, NodeError>;

    /// Entries added since the previous poll of `id`.
    async fn filter_changes(&self, id: &FilterId) -> Result<Vec<RawLog>, NodeError>;

    /// Returns `false` if the node no longer knew the filter.
    async fn uninstall_filter(&self, id: &FilterId) -> Result<bool, NodeError>;
}

/// Capped exponential delay for the `attempt`-th consecutive failure
/// (1-based): `initial * multiplier^(attempt - 1)`, never above `max`.
pub fn backoff_delay(initial: Duration, multiplier: f64, attempt: u32, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(64) as i32;
    let base_ms = initial.as_millis() as f64 * multiplier.powi(exp);
    let cap_ms = max.as_millis() as f64;
    Duration::from_millis(base_ms.min(cap_ms) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let d = |n| backoff_delay(Duration::from_secs(5), 2.0, n, Duration::from_secs(60)).as_secs();
        assert_eq!((0..=6).map(d).collect::<Vec<_>>(), vec![5, 5, 10, 20, 40, 60, 60]);
        assert_eq!(d(u32::MAX), 60);
    }
}
