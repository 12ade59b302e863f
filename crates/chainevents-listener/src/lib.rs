//! chainevents-listener: live ingestion for ChainEvents.
//!
//! [`EventListener`] multiplexes node-side log filters over a single polling
//! loop; [`BlockListener`] publishes block headers on the same bus.
//! [`PoolDiscovery`] adds Uniswap V3 pools to the listener as the factory
//! deploys them.

pub mod backoff;
pub mod block_listener;
pub mod config;
pub mod discovery;
pub mod listener;
pub mod metrics;

pub use backoff::Backoff;
pub use block_listener::BlockListener;
pub use config::{BlockListenerConfig, ListenerConfig};
pub use discovery::{PoolCreated, PoolDiscovery, PoolDiscoveryConfig, PoolSeed};
pub use listener::{ActiveFilter, EventListener, ListenerState};
pub use metrics::{ListenerMetrics, SweepReport};
