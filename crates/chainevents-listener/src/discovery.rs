//! `PoolDiscovery`: grows the watch list as a Uniswap V3 factory deploys pools.
//!
//! The factory's `PoolCreated` event is watched like any other contract
//! event and reaches this subscriber through the bus. Every new pool is
//! handed to the listener with its `Swap` event; a pool is added at most once,
//! whether it came from the seed list or from the factory.

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info, warn};

use chainevents_core::{
    signatures::{UNISWAP_V3_POOL_CREATED, UNISWAP_V3_SWAP},
    ChainEvent, ContractWatch, EventKind, HandlerError, HandlerTable, NodeClient, RawLog,
    Subscriber, WatchedEvent,
};

use crate::listener::EventListener;

pub const UNISWAP_V3_FACTORY: Address = address!("1f98431c8ad98523631ae4a59f267346ea31f984");

/// A pool to watch from startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSeed {
    pub name: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolDiscoveryConfig {
    #[serde(default = "default_factory")]
    pub factory: Address,
    #[serde(default)]
    pub pools: Vec<PoolSeed>,
}

fn default_factory() -> Address {
    UNISWAP_V3_FACTORY
}

impl Default for PoolDiscoveryConfig {
    fn default() -> Self {
        Self {
            factory: default_factory(),
            pools: Vec::new(),
        }
    }
}

/// A decoded `PoolCreated` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolCreated {
    pub token0: Address,
    pub token1: Address,
    pub pool: Address,
}

impl PoolCreated {
    /// `PoolCreated(address indexed token0, address indexed token1,
    /// uint24 indexed fee, int24 tickSpacing, address pool)`: the pool is
    /// the second data word.
    pub fn from_log(log: &RawLog) -> Option<Self> {
        if log.topic0() != Some(&UNISWAP_V3_POOL_CREATED) || log.topics.len() < 4 {
            return None;
        }
        let pool = log.data.get(44..64)?;
        Some(Self {
            token0: Address::from_word(log.topics[1]),
            token1: Address::from_word(log.topics[2]),
            pool: Address::from_slice(pool),
        })
    }

    /// `0xAbCd/0x1234` from the checksummed token prefixes.
    pub fn pair_name(&self) -> String {
        let short = |a: &Address| a.to_string().chars().take(6).collect::<String>();
        format!("{}/{}", short(&self.token0), short(&self.token1))
    }
}

pub struct PoolDiscovery<C: NodeClient + ?Sized> {
    listener: Weak<EventListener<C>>,
    config: PoolDiscoveryConfig,
    known: Mutex<HashSet<Address>>,
}

impl<C: NodeClient + ?Sized + 'static> PoolDiscovery<C> {
    pub fn new(listener: &Arc<EventListener<C>>, config: PoolDiscoveryConfig) -> Self {
        Self {
            listener: Arc::downgrade(listener),
            config,
            known: Mutex::new(HashSet::new()),
        }
    }

    pub fn known_pools(&self) -> usize {
        self.known.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn factory_watch(&self) -> ContractWatch {
        ContractWatch {
            name: "UniswapV3Factory".into(),
            address: self.config.factory,
            events: vec![WatchedEvent {
                name: "PoolCreated".into(),
                signature: UNISWAP_V3_POOL_CREATED,
                topics: vec![],
                enabled: true,
            }],
            block_range: None,
        }
    }

    fn pool_watch(name: &str, address: Address) -> ContractWatch {
        ContractWatch {
            name: format!("UniswapV3Pool_{name}"),
            address,
            events: vec![WatchedEvent {
                name: "Swap".into(),
                signature: UNISWAP_V3_SWAP,
                topics: vec![],
                enabled: true,
            }],
            block_range: None,
        }
    }

    /// Register the factory watch and every seed pool. Before
    /// `start_listening` this only records them.
    pub async fn start(&self) -> usize {
        let Some(listener) = self.listener.upgrade() else {
            warn!("listener dropped, pool discovery not started");
            return 0;
        };
        listener.add_watch(self.factory_watch()).await;
        let mut added = 0;
        for seed in &self.config.pools {
            if self.add_pool(seed.address, &seed.name).await {
                added += 1;
            }
        }
        info!(factory = %self.config.factory, seeded = added, "pool discovery started");
        added
    }

    /// Watch `address` unless it is already known. Returns whether it was new.
    pub async fn add_pool(&self, address: Address, name: &str) -> bool {
        let Some(listener) = self.listener.upgrade() else {
            return false;
        };
        if !self
            .known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address)
        {
            debug!(pool = %address, "pool already monitored");
            return false;
        }
        info!(pool = %address, %name, "adding pool to monitoring");
        listener.add_watch(Self::pool_watch(name, address)).await;
        true
    }

    async fn on_event(&self, event: &ChainEvent) -> Result<(), HandlerError> {
        let ChainEvent::Generic(e) = event else {
            return Ok(());
        };
        if e.contract_address != self.config.factory
            || e.raw_data.topic0() != Some(&UNISWAP_V3_POOL_CREATED)
        {
            return Ok(());
        }
        let created = PoolCreated::from_log(&e.raw_data).ok_or_else(|| {
            HandlerError::failed("pool_created", format!("malformed PoolCreated in {}", e.transaction_hash))
        })?;
        let name = created.pair_name();
        info!(pool = %created.pool, %name, block = e.block_number, "new pool created");
        self.add_pool(created.pool, &name).await;
        Ok(())
    }
}

impl<C: NodeClient + ?Sized + 'static> Subscriber for PoolDiscovery<C> {
    fn handler_table(self: Arc<Self>) -> HandlerTable {
        HandlerTable::new("pool-discovery").bind_async(EventKind::Generic, "pool_created", move |event| {
            let this = Arc::clone(&self);
            async move { this.on_event(&event).await }
        })
    }
}
