//! Typed event model.
//!
//! Every value flowing through the bus is a [`ChainEvent`], a sum type whose
//! variant is the dispatch key ([`EventKind`]). Log-derived variants share the
//! [`EthereumEvent`] base; blocks carry their own header shape.

use alloy_primitives::{aliases::U160, Address, B256, I256, U256};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::types::{decimal, BlockData, RawLog};

/// Dispatch key for the event bus and the signature registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Generic,
    Erc20Transfer,
    UniswapSwap,
    UniswapInitialize,
    UniswapModifyLiquidity,
    Block,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::Generic,
        Self::Erc20Transfer,
        Self::UniswapSwap,
        Self::UniswapInitialize,
        Self::UniswapModifyLiquidity,
        Self::Block,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Erc20Transfer => "erc20_transfer",
            Self::UniswapSwap => "uniswap_swap",
            Self::UniswapInitialize => "uniswap_initialize",
            Self::UniswapModifyLiquidity => "uniswap_modify_liquidity",
            Self::Block => "block",
        }
    }

    pub fn is_uniswap(&self) -> bool {
        matches!(
            self,
            Self::UniswapSwap | Self::UniswapInitialize | Self::UniswapModifyLiquidity
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Field ───────────────────────────────────────────────────────────────────

/// A protocol field that may not be recoverable from the log payload.
///
/// Missing or out-of-width words become `Undecoded` instead of zero.
/// Serialises as the value's decimal/hex display string or `"undecoded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<T> {
    Decoded(T),
    Undecoded,
}

impl<T> Field<T> {
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Decoded(v) => Some(v),
            Self::Undecoded => None,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Undecoded, Self::Decoded)
    }
}

impl<T: fmt::Display> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Decoded(v) => s.collect_str(v),
            Self::Undecoded => s.serialize_str("undecoded"),
        }
    }
}

// ─── Log-derived events ──────────────────────────────────────────────────────

/// Fields shared by every log-derived event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EthereumEvent {
    pub event_name: String,
    pub contract_address: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub timestamp: DateTime<Utc>,
    /// The undecoded log, kept verbatim.
    pub raw_data: RawLog,
}

impl EthereumEvent {
    pub fn from_log(log: &RawLog, event_name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_name: event_name.into(),
            contract_address: log.address,
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            timestamp,
            raw_data: log.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Erc20TransferEvent {
    #[serde(flatten)]
    pub base: EthereumEvent,
    pub from_address: Address,
    pub to_address: Address,
    #[serde(serialize_with = "decimal::serialize")]
    pub value: U256,
    pub token_symbol: Option<String>,
    pub token_decimals: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniswapSwapEvent {
    #[serde(flatten)]
    pub base: EthereumEvent,
    pub pool_id: B256,
    pub sender: Field<Address>,
    pub amount_0: Field<i128>,
    pub amount_1: Field<i128>,
    pub sqrt_price_x96: Field<U160>,
    pub liquidity: Field<u128>,
    pub tick: Field<i32>,
    pub fee: Field<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniswapInitializeEvent {
    #[serde(flatten)]
    pub base: EthereumEvent,
    pub pool_id: B256,
    pub currency0: Field<Address>,
    pub currency1: Field<Address>,
    pub fee: Field<u32>,
    pub tick_spacing: Field<i32>,
    pub hooks: Field<Address>,
    pub sqrt_price_x96: Field<U160>,
    pub tick: Field<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniswapModifyLiquidityEvent {
    #[serde(flatten)]
    pub base: EthereumEvent,
    pub pool_id: B256,
    pub sender: Field<Address>,
    pub tick_lower: Field<i32>,
    pub tick_upper: Field<i32>,
    pub liquidity_delta: Field<I256>,
    pub salt: Field<B256>,
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockEvent {
    pub block_number: u64,
    pub block_hash: B256,
    pub parent_hash: B256,
    pub timestamp: DateTime<Utc>,
    pub transaction_count: usize,
    pub gas_used: u64,
    pub gas_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner: Option<Address>,
}

impl BlockEvent {
    /// Gas used as a percentage of the limit; `0.0` when the limit is zero.
    pub fn gas_utilization(&self) -> f64 {
        if self.gas_limit == 0 {
            return 0.0;
        }
        self.gas_used as f64 / self.gas_limit as f64 * 100.0
    }
}

impl From<&BlockData> for BlockEvent {
    fn from(b: &BlockData) -> Self {
        Self {
            block_number: b.number,
            block_hash: b.hash,
            parent_hash: b.parent_hash,
            timestamp: unix_to_utc(b.timestamp),
            transaction_count: b.transaction_count(),
            gas_used: b.gas_used,
            gas_limit: b.gas_limit,
            miner: b.miner,
        }
    }
}

/// Unix seconds to UTC, clamping out-of-range values to the epoch.
pub fn unix_to_utc(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

// ─── ChainEvent ──────────────────────────────────────────────────────────────

/// Any event the pipeline produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainEvent {
    Generic(EthereumEvent),
    Erc20Transfer(Erc20TransferEvent),
    UniswapSwap(UniswapSwapEvent),
    UniswapInitialize(UniswapInitializeEvent),
    UniswapModifyLiquidity(UniswapModifyLiquidityEvent),
    Block(BlockEvent),
}

impl ChainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Generic(_) => EventKind::Generic,
            Self::Erc20Transfer(_) => EventKind::Erc20Transfer,
            Self::UniswapSwap(_) => EventKind::UniswapSwap,
            Self::UniswapInitialize(_) => EventKind::UniswapInitialize,
            Self::UniswapModifyLiquidity(_) => EventKind::UniswapModifyLiquidity,
            Self::Block(_) => EventKind::Block,
        }
    }

    /// The log-derived base, or `None` for blocks.
    pub fn base(&self) -> Option<&EthereumEvent> {
        match self {
            Self::Generic(e) => Some(e),
            Self::Erc20Transfer(e) => Some(&e.base),
            Self::UniswapSwap(e) => Some(&e.base),
            Self::UniswapInitialize(e) => Some(&e.base),
            Self::UniswapModifyLiquidity(e) => Some(&e.base),
            Self::Block(_) => None,
        }
    }

    pub fn event_name(&self) -> &str {
        self.base().map_or("Block", |b| b.event_name.as_str())
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Block(b) => b.block_number,
            other => other.base().map_or(0, |b| b.block_number),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Block(b) => b.timestamp,
            other => other.base().map_or(DateTime::UNIX_EPOCH, |b| b.timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use serde_json::json;

    fn raw() -> RawLog {
        RawLog {
            address: Address::repeat_byte(0x11),
            topics: vec![B256::repeat_byte(0xaa)],
            data: Bytes::new(),
            block_number: 7,
            block_hash: None,
            transaction_hash: B256::repeat_byte(0x22),
            log_index: 3,
            timestamp: Some(1_700_000_000),
            removed: None,
            contract_name: None,
            event_name: None,
            event_signature: None,
        }
    }

    #[test]
    fn field_serialises_undecoded_marker() {
        let v = serde_json::to_value(Field::<i128>::Undecoded).unwrap();
        assert_eq!(v, json!("undecoded"));
        let v = serde_json::to_value(Field::Decoded(-5i128)).unwrap();
        assert_eq!(v, json!("-5"));
    }

    #[test]
    fn chain_event_tagged_by_kind() {
        let base = EthereumEvent::from_log(&raw(), "Mystery", unix_to_utc(1_700_000_000));
        let ev = ChainEvent::Generic(base);
        assert_eq!(ev.kind(), EventKind::Generic);
        assert_eq!(ev.event_name(), "Mystery");
        assert_eq!(ev.block_number(), 7);

        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "generic");
        assert_eq!(v["log_index"], 3);
    }

    #[test]
    fn transfer_value_is_decimal_string() {
        let ev = Erc20TransferEvent {
            base: EthereumEvent::from_log(&raw(), "Transfer", DateTime::UNIX_EPOCH),
            from_address: Address::ZERO,
            to_address: Address::ZERO,
            value: U256::from(u128::MAX) * U256::from(4u8),
            token_symbol: Some("USDC".into()),
            token_decimals: None,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["value"], "1361129467683753853853498429727072845820");
        assert_eq!(v["event_name"], "Transfer");
    }

    #[test]
    fn block_utilization_zero_limit() {
        let b = BlockEvent {
            block_number: 1,
            block_hash: B256::ZERO,
            parent_hash: B256::ZERO,
            timestamp: DateTime::UNIX_EPOCH,
            transaction_count: 0,
            gas_used: 10,
            gas_limit: 0,
            miner: None,
        };
        assert_eq!(b.gas_utilization(), 0.0);
    }
}
