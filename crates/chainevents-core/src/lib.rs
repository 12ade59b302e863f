//! chainevents-core: event model, decoding and dispatch for ChainEvents.
//!
//! # Architecture
//!
//! ```text
//! NodeClient (poll filter) ──► RawLog
//!                                │
//!                                ▼
//!                 LogDecoder (EventSignatures lookup on topic[0])
//!                                │
//!                                ▼
//!                 ChainEvent (tagged by EventKind)
//!                                │
//!                                ▼
//!                 EventBus ──► sync handlers (in order)
//!                          └─► async handlers (JoinSet, isolated)
//! ```
//!
//! The live listener and the batch transformer live in sibling crates and
//! share everything defined here.

pub mod bus;
pub mod decoder;
pub mod error;
pub mod event;
pub mod handler;
pub mod node;
pub mod signatures;
pub mod types;

pub use bus::{DispatchReport, EventBus, HandlerTable, Subscriber, SubscriberId};
pub use decoder::{EventSource, LogDecoder};
pub use error::{
    BusError, ConfigError, DecodeError, HandlerError, NodeError, RegistryError, SubscriptionError,
};
pub use event::{
    BlockEvent, ChainEvent, Erc20TransferEvent, EthereumEvent, EventKind, Field,
    UniswapInitializeEvent, UniswapModifyLiquidityEvent, UniswapSwapEvent,
};
pub use handler::{EventHandlerService, HandlerServiceConfig, HandlerStats};
pub use node::{backoff_delay, FilterId, NodeClient};
pub use signatures::{keccak256_signature, EventSignatures, SignatureEntry};
pub use types::{BlockData, BlockRange, BlockTag, ContractWatch, LogFilter, RawLog, WatchedEvent};
