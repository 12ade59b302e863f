//! `LogDecoder`: maps a raw log to its typed [`ChainEvent`].
//!
//! Dispatch is on `topics[0]` through [`EventSignatures`]. Unknown signatures
//! yield a generic event carrying the log verbatim.
//!
//! # Word layout
//! Non-indexed parameters are packed as consecutive 32-byte big-endian words.
//! A word that is missing, or whose value does not fit the declared Solidity
//! width, decodes to [`Field::Undecoded`].

use alloy_primitives::{aliases::U160, Address, B256, I256, U256};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::DecodeError;
use crate::event::{
    ChainEvent, Erc20TransferEvent, EthereumEvent, EventKind, Field, UniswapInitializeEvent,
    UniswapModifyLiquidityEvent, UniswapSwapEvent,
};
use crate::signatures::EventSignatures;
use crate::types::RawLog;

/// The subscription a log arrived through.
#[derive(Debug, Clone, Copy)]
pub struct EventSource<'a> {
    pub contract_name: &'a str,
    /// Event name from the watch configuration.
    pub event_name: &'a str,
}

impl<'a> EventSource<'a> {
    pub fn new(contract_name: &'a str, event_name: &'a str) -> Self {
        Self {
            contract_name,
            event_name,
        }
    }

    /// Source taken from the extractor's annotations on the log itself.
    pub fn from_annotations(log: &'a RawLog) -> Self {
        Self {
            contract_name: log.contract_name.as_deref().unwrap_or(""),
            event_name: log.event_name.as_deref().unwrap_or(""),
        }
    }
}

/// Thread-safe, cheap to clone.
#[derive(Debug, Clone)]
pub struct LogDecoder {
    signatures: Arc<EventSignatures>,
}

impl Default for LogDecoder {
    fn default() -> Self {
        Self::new(EventSignatures::with_defaults())
    }
}

impl LogDecoder {
    pub fn new(signatures: EventSignatures) -> Self {
        Self {
            signatures: Arc::new(signatures),
        }
    }

    pub fn signatures(&self) -> &EventSignatures {
        &self.signatures
    }

    /// The kind `log` would decode as, without decoding it.
    pub fn classify(&self, log: &RawLog) -> EventKind {
        log.topic0()
            .map_or(EventKind::Generic, |sig| self.signatures.kind_of(sig))
    }

    pub fn decode(
        &self,
        log: &RawLog,
        source: EventSource<'_>,
        timestamp: DateTime<Utc>,
    ) -> Result<ChainEvent, DecodeError> {
        let sig = log.topic0().ok_or(DecodeError::MissingSignature)?;
        let entry = self.signatures.lookup(sig);
        let name = match (source.event_name, entry) {
            ("", Some(e)) => e.name.as_str(),
            ("", None) => "Unknown",
            (n, _) => n,
        };
        let base = EthereumEvent::from_log(log, name, timestamp);

        match entry.map_or(EventKind::Generic, |e| e.kind) {
            EventKind::Erc20Transfer => decode_transfer(log, base, source.contract_name),
            EventKind::UniswapSwap => decode_swap(log, base),
            EventKind::UniswapInitialize => decode_initialize(log, base),
            EventKind::UniswapModifyLiquidity => decode_modify_liquidity(log, base),
            EventKind::Generic | EventKind::Block => Ok(ChainEvent::Generic(base)),
        }
    }
}

// ─── Per-kind decoders ───────────────────────────────────────────────────────

fn require_topics(log: &RawLog, event: &'static str, expected: usize) -> Result<(), DecodeError> {
    if log.topics.len() < expected {
        return Err(DecodeError::MissingTopics {
            event,
            expected,
            got: log.topics.len(),
        });
    }
    Ok(())
}

fn decode_transfer(
    log: &RawLog,
    base: EthereumEvent,
    contract_name: &str,
) -> Result<ChainEvent, DecodeError> {
    require_topics(log, "Transfer", 3)?;
    let value = parse_uint_payload(&log.data).ok_or(DecodeError::ValueOverflow {
        event: "Transfer",
        len: significant_len(&log.data),
    })?;
    Ok(ChainEvent::Erc20Transfer(Erc20TransferEvent {
        base,
        from_address: topic_address(&log.topics[1]),
        to_address: topic_address(&log.topics[2]),
        value,
        token_symbol: (!contract_name.is_empty()).then(|| contract_name.to_string()),
        token_decimals: None,
    }))
}

fn decode_swap(log: &RawLog, base: EthereumEvent) -> Result<ChainEvent, DecodeError> {
    require_topics(log, "Swap", 2)?;
    let w = Words(&log.data);
    Ok(ChainEvent::UniswapSwap(UniswapSwapEvent {
        base,
        pool_id: log.topics[1],
        sender: log.topics.get(2).map(topic_address).into(),
        amount_0: w.int128(0).into(),
        amount_1: w.int128(1).into(),
        sqrt_price_x96: w.uint160(2).into(),
        liquidity: w.uint128(3).into(),
        tick: w.int24(4).into(),
        fee: w.uint24(5).into(),
    }))
}

fn decode_initialize(log: &RawLog, base: EthereumEvent) -> Result<ChainEvent, DecodeError> {
    require_topics(log, "Initialize", 2)?;
    let w = Words(&log.data);
    Ok(ChainEvent::UniswapInitialize(UniswapInitializeEvent {
        base,
        pool_id: log.topics[1],
        currency0: log.topics.get(2).map(topic_address).into(),
        currency1: log.topics.get(3).map(topic_address).into(),
        fee: w.uint24(0).into(),
        tick_spacing: w.int24(1).into(),
        hooks: w.address(2).into(),
        sqrt_price_x96: w.uint160(3).into(),
        tick: w.int24(4).into(),
    }))
}

fn decode_modify_liquidity(log: &RawLog, base: EthereumEvent) -> Result<ChainEvent, DecodeError> {
    require_topics(log, "ModifyLiquidity", 2)?;
    let w = Words(&log.data);
    Ok(ChainEvent::UniswapModifyLiquidity(UniswapModifyLiquidityEvent {
        base,
        pool_id: log.topics[1],
        sender: log.topics.get(2).map(topic_address).into(),
        tick_lower: w.int24(0).into(),
        tick_upper: w.int24(1).into(),
        liquidity_delta: w.int256(2).into(),
        salt: w.bytes32(3).into(),
    }))
}

// ─── Byte helpers ────────────────────────────────────────────────────────────

/// Low-order 20 bytes of an indexed topic.
pub fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

fn significant_len(data: &[u8]) -> usize {
    data.iter().skip_while(|b| **b == 0).count()
}

/// Big-endian unsigned integer from a whole payload. Empty is zero; more
/// than 256 significant bits is `None`.
pub fn parse_uint_payload(data: &[u8]) -> Option<U256> {
    let start = data.len() - significant_len(data);
    let trimmed = &data[start..];
    if trimmed.len() > 32 {
        return None;
    }
    Some(U256::from_be_slice(trimmed))
}

/// Reader over the 32-byte words of a log's data payload.
struct Words<'a>(&'a [u8]);

impl<'a> Words<'a> {
    fn word(&self, i: usize) -> Option<&'a [u8]> {
        self.0.get(i * 32..(i + 1) * 32)
    }

    fn uint(&self, i: usize, bits: usize) -> Option<U256> {
        let v = U256::from_be_slice(self.word(i)?);
        (bits >= 256 || v >> bits == U256::ZERO).then_some(v)
    }

    /// Signed value that sign-extends correctly from `bits` (≤ 128).
    fn int(&self, i: usize, bits: u32) -> Option<i128> {
        let raw = I256::from_raw(U256::from_be_slice(self.word(i)?));
        let v = i128::try_from(raw).ok()?;
        if bits >= 128 {
            return Some(v);
        }
        let lim = 1i128 << (bits - 1);
        (-lim..lim).contains(&v).then_some(v)
    }

    fn int128(&self, i: usize) -> Option<i128> {
        self.int(i, 128)
    }

    fn int24(&self, i: usize) -> Option<i32> {
        self.int(i, 24).and_then(|v| i32::try_from(v).ok())
    }

    fn int256(&self, i: usize) -> Option<I256> {
        self.word(i)
            .map(|w| I256::from_raw(U256::from_be_slice(w)))
    }

    fn uint24(&self, i: usize) -> Option<u32> {
        self.uint(i, 24).and_then(|v| u32::try_from(v).ok())
    }

    fn uint128(&self, i: usize) -> Option<u128> {
        self.uint(i, 128).and_then(|v| u128::try_from(v).ok())
    }

    fn uint160(&self, i: usize) -> Option<U160> {
        let w = self.word(i)?;
        if w[..12].iter().any(|b| *b != 0) {
            return None;
        }
        U160::try_from_be_slice(&w[12..])
    }

    fn address(&self, i: usize) -> Option<Address> {
        let w = self.word(i)?;
        w[..12]
            .iter()
            .all(|b| *b == 0)
            .then(|| Address::from_slice(&w[12..]))
    }

    fn bytes32(&self, i: usize) -> Option<B256> {
        self.word(i).map(B256::from_slice)
    }
}
