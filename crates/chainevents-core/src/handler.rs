//! `EventHandlerService`: the reference bus subscriber.
//!
//! Binds one synchronous handler per event kind. Every event is logged;
//! large transfers, congested blocks and traffic touching watched addresses
//! are flagged at `warn`/`info`.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::bus::{HandlerTable, Subscriber};
use crate::error::HandlerError;
use crate::event::{ChainEvent, EventKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HandlerServiceConfig {
    /// Transfers strictly above this raw value are flagged.
    #[serde(default = "default_large_transfer", alias = "large_transfer_threshold")]
    pub large_transfer_threshold: U256,
    /// Blocks strictly above this gas utilisation (percent) are flagged.
    #[serde(default = "default_high_utilization", alias = "high_utilization_percent")]
    pub high_utilization_percent: f64,
    /// Address → label.
    #[serde(default, alias = "watched_addresses")]
    pub watched_addresses: HashMap<Address, String>,
}

fn default_large_transfer() -> U256 {
    U256::from(10_000u64) * U256::from(10u64).pow(U256::from(18u64))
}

fn default_high_utilization() -> f64 {
    90.0
}

impl Default for HandlerServiceConfig {
    fn default() -> Self {
        Self {
            large_transfer_threshold: default_large_transfer(),
            high_utilization_percent: default_high_utilization(),
            watched_addresses: HashMap::new(),
        }
    }
}

/// Counters kept by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    pub handled: BTreeMap<EventKind, u64>,
    pub large_transfers: u64,
    pub congested_blocks: u64,
    pub watched_hits: u64,
}

pub struct EventHandlerService {
    config: HandlerServiceConfig,
    stats: Mutex<HandlerStats>,
}

impl EventHandlerService {
    pub fn new(config: HandlerServiceConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(HandlerStats::default()),
        }
    }

    pub fn stats(&self) -> HandlerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, f: impl FnOnce(&mut HandlerStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Handle one event of any kind.
    pub fn handle(&self, event: &ChainEvent) -> Result<(), HandlerError> {
        self.record(|s| *s.handled.entry(event.kind()).or_default() += 1);
        match event {
            ChainEvent::Generic(e) => {
                info!(
                    event = %e.event_name,
                    contract = %e.contract_address,
                    block = e.block_number,
                    "ethereum event"
                );
            }
            ChainEvent::Erc20Transfer(t) => {
                info!(
                    value = %t.value,
                    token = t.token_symbol.as_deref().unwrap_or("tokens"),
                    from = %t.from_address,
                    to = %t.to_address,
                    block = t.base.block_number,
                    tx = %t.base.transaction_hash,
                    "ERC20 transfer"
                );
                if t.value > self.config.large_transfer_threshold {
                    warn!(value = %t.value, tx = %t.base.transaction_hash, "large transfer detected");
                    self.record(|s| s.large_transfers += 1);
                }
                for (direction, addr) in [("from", &t.from_address), ("to", &t.to_address)] {
                    if let Some(label) = self.config.watched_addresses.get(addr) {
                        info!(direction, address = %addr, label = %label, "watched address transfer");
                        self.record(|s| s.watched_hits += 1);
                    }
                }
            }
            ChainEvent::UniswapSwap(s) => {
                info!(
                    pool = %s.pool_id,
                    amount0 = ?s.amount_0,
                    amount1 = ?s.amount_1,
                    block = s.base.block_number,
                    "uniswap swap"
                );
            }
            ChainEvent::UniswapInitialize(i) => {
                info!(
                    pool = %i.pool_id,
                    currency0 = ?i.currency0,
                    currency1 = ?i.currency1,
                    fee = ?i.fee,
                    block = i.base.block_number,
                    "uniswap pool initialized"
                );
            }
            ChainEvent::UniswapModifyLiquidity(m) => {
                let action = match m.liquidity_delta.get() {
                    Some(d) if d.is_positive() => "added",
                    Some(_) => "removed",
                    None => "changed",
                };
                info!(
                    pool = %m.pool_id,
                    action,
                    delta = ?m.liquidity_delta,
                    tick_lower = ?m.tick_lower,
                    tick_upper = ?m.tick_upper,
                    block = m.base.block_number,
                    "uniswap liquidity"
                );
            }
            ChainEvent::Block(b) => {
                info!(
                    block = b.block_number,
                    hash = %b.block_hash,
                    txs = b.transaction_count,
                    gas_used = b.gas_used,
                    gas_limit = b.gas_limit,
                    "new block"
                );
                let utilization = b.gas_utilization();
                if utilization > self.config.high_utilization_percent {
                    warn!(
                        block = b.block_number,
                        utilization = %format!("{utilization:.1}%"),
                        "high network utilization"
                    );
                    self.record(|s| s.congested_blocks += 1);
                }
            }
        }
        Ok(())
    }
}

impl Subscriber for EventHandlerService {
    fn handler_table(self: Arc<Self>) -> HandlerTable {
        let kinds = [
            (EventKind::Generic, "handle_ethereum_event"),
            (EventKind::Erc20Transfer, "handle_erc20_transfer"),
            (EventKind::UniswapSwap, "handle_uniswap_swap"),
            (EventKind::UniswapInitialize, "handle_uniswap_initialize"),
            (EventKind::UniswapModifyLiquidity, "handle_uniswap_modify_liquidity"),
            (EventKind::Block, "handle_block"),
        ];
        kinds
            .into_iter()
            .fold(HandlerTable::new("EventHandlerService"), |table, (kind, name)| {
                let svc = Arc::clone(&self);
                table.bind(kind, name, move |ev| svc.handle(ev))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::event::{unix_to_utc, BlockEvent, Erc20TransferEvent, EthereumEvent};
    use crate::types::RawLog;
    use alloy_primitives::{address, Bytes, B256};

    fn transfer(value: U256, from: Address) -> ChainEvent {
        let log = RawLog {
            address: Address::ZERO,
            topics: vec![B256::ZERO],
            data: Bytes::new(),
            block_number: 1,
            block_hash: None,
            transaction_hash: B256::ZERO,
            log_index: 0,
            timestamp: None,
            removed: None,
            contract_name: None,
            event_name: None,
            event_signature: None,
        };
        ChainEvent::Erc20Transfer(Erc20TransferEvent {
            base: EthereumEvent::from_log(&log, "Transfer", unix_to_utc(0)),
            from_address: from,
            to_address: Address::ZERO,
            value,
            token_symbol: None,
            token_decimals: None,
        })
    }

    fn block(gas_used: u64, gas_limit: u64) -> ChainEvent {
        ChainEvent::Block(BlockEvent {
            block_number: 10,
            block_hash: B256::ZERO,
            parent_hash: B256::ZERO,
            timestamp: unix_to_utc(0),
            transaction_count: 0,
            gas_used,
            gas_limit,
            miner: None,
        })
    }

    #[test]
    fn flags_large_transfers_and_watched_addresses() {
        let hot = address!("28c6c06298d514db089934071355e5743bf21d60");
        let mut config = HandlerServiceConfig::default();
        config.watched_addresses.insert(hot, "Exchange Hot Wallet".into());
        let svc = EventHandlerService::new(config);

        let threshold = default_large_transfer();
        svc.handle(&transfer(threshold, Address::ZERO)).unwrap();
        svc.handle(&transfer(threshold + U256::from(1u8), hot)).unwrap();

        let stats = svc.stats();
        assert_eq!(stats.large_transfers, 1);
        assert_eq!(stats.watched_hits, 1);
        assert_eq!(stats.handled[&EventKind::Erc20Transfer], 2);
    }

    #[test]
    fn flags_congested_blocks() {
        let svc = EventHandlerService::new(HandlerServiceConfig::default());
        svc.handle(&block(90, 100)).unwrap();
        svc.handle(&block(91, 100)).unwrap();
        svc.handle(&block(5, 0)).unwrap();
        assert_eq!(svc.stats().congested_blocks, 1);
    }

    #[test]
    fn registers_one_handler_per_kind() {
        let bus = EventBus::new();
        let svc = Arc::new(EventHandlerService::new(HandlerServiceConfig::default()));
        bus.subscribe(Arc::clone(&svc)).unwrap();
        assert_eq!(bus.handler_count(EventKind::Block), 1);
        assert_eq!(bus.handler_count(EventKind::UniswapSwap), 1);

        let report = bus.publish(&block(1, 2));
        assert_eq!(report.sync_invoked, 1);
        assert_eq!(svc.stats().handled[&EventKind::Block], 1);
    }
}
