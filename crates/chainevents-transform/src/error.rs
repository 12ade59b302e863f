//! Error types for the batch path.

use thiserror::Error;

use chainevents_core::NodeError;

/// Errors raised while pulling a bundle from a node.
///
/// Transformation itself never fails: malformed logs are skipped and counted.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid block range: from {from} is after to {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("node error: {0}")]
    Node(#[from] NodeError),
}

impl ExtractError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Node(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_errors_keep_their_retry_class() {
        let e: ExtractError = NodeError::Timeout { ms: 30_000 }.into();
        assert!(e.is_retryable());
        assert!(!ExtractError::InvalidRange { from: 9, to: 1 }.is_retryable());
    }
}
