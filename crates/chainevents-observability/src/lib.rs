//! chainevents-observability: structured logging setup for ChainEvents.
//!
//! Every crate in the workspace logs through `tracing`; this crate installs
//! the subscriber. Levels are configurable globally and per component, and
//! output is either human-readable or JSON lines for log shippers.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig};
