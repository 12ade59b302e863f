//! Error types for the ChainEvents pipeline.
//!
//! Every category is recovered locally except [`ConfigError`], which is only
//! raised before listening starts.

use thiserror::Error;

/// Failures talking to the node (unreachable, slow, bad response).
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("filter {0} not found on node")]
    FilterNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl NodeError {
    /// Returns `true` if the error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// A log whose shape does not match the event kind its signature claims.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingSignature,

    #[error("{event} requires at least {expected} topics, got {got}")]
    MissingTopics {
        event: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{event} value does not fit in 256 bits ({len} significant bytes)")]
    ValueOverflow { event: &'static str, len: usize },

    #[error("invalid raw log: {0}")]
    InvalidLog(String),
}

/// Filter creation failed for one (contract, event) pair.
#[derive(Debug, Error)]
#[error("failed to subscribe {contract}.{event}: {source}")]
pub struct SubscriptionError {
    pub contract: String,
    pub event: String,
    #[source]
    pub source: NodeError,
}

/// A subscriber handler failed.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler '{handler}' failed: {reason}")]
    Failed { handler: String, reason: String },

    #[error("handler '{handler}' panicked")]
    Panicked { handler: String },
}

impl HandlerError {
    pub fn failed(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

/// Event bus registration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("subscriber '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Signature registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("signature {signature} already registered as {existing}, refusing {requested}")]
    Conflict {
        signature: String,
        existing: String,
        requested: String,
    },
}

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("contract '{contract}': {reason}")]
    InvalidContract { contract: String, reason: String },

    #[error("no contracts configured")]
    EmptyWatchList,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
