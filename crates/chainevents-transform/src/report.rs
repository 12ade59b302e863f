//! Batch-path output: the transformed bundle and its per-contract reports.
//!
//! The top-level keys `metadata`, `transformed_blocks`, `transformed_events`
//! and `analytics` are a stable wire contract. Arbitrary-precision values are
//! emitted as decimal strings.

use alloy_primitives::{Address, B256, U256, U512};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::ops::AddAssign;

use chainevents_core::{
    types::decimal, Erc20TransferEvent, RawLog, UniswapInitializeEvent,
    UniswapModifyLiquidityEvent, UniswapSwapEvent,
};

use crate::bundle::{BlockSpan, ExtractionSummary};

/// Sum of token values. Wide enough that adding `U256` values cannot wrap
/// for any realistic batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(pub U512);

impl AddAssign<U256> for Amount {
    fn add_assign(&mut self, rhs: U256) {
        self.0 = self.0.saturating_add(U512::from_be_slice(&rhs.to_be_bytes::<32>()));
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&self.0)
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct TransformedBundle {
    pub metadata: Metadata,
    pub transformed_blocks: BlockSection,
    pub transformed_events: IndexMap<String, ContractReport>,
    pub analytics: Analytics,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub original_extraction_timestamp: Option<DateTime<Utc>>,
    pub transformation_timestamp: DateTime<Utc>,
    pub block_range: Option<BlockSpan>,
    pub summary: Option<ExtractionSummary>,
}

/// Serialises as `{}` when the bundle carried no block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BlockSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformed_block: Option<BlockReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformation_timestamp: Option<DateTime<Utc>>,
}

/// One contract's batch, shaped by its classification.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ContractReport {
    Erc20(Erc20Report),
    Uniswap(UniswapReport),
    Generic(GenericReport),
}

impl ContractReport {
    /// Events that made it into the report.
    pub fn event_count(&self) -> usize {
        match self {
            Self::Erc20(r) => r.events.len(),
            Self::Uniswap(r) => {
                r.swap_events.len() + r.initialize_events.len() + r.liquidity_events.len()
            }
            Self::Generic(r) => r.event_count,
        }
    }

    pub fn skipped(&self) -> usize {
        match self {
            Self::Erc20(r) => r.summary.skipped,
            Self::Uniswap(r) => r.summary.skipped,
            Self::Generic(_) => 0,
        }
    }
}

// ─── ERC-20 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub contract_address: Address,
    pub from_address: Address,
    pub to_address: Address,
    #[serde(serialize_with = "decimal::serialize")]
    pub value: U256,
    pub value_hex: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Erc20TransferEvent> for TransferRecord {
    fn from(t: &Erc20TransferEvent) -> Self {
        Self {
            transaction_hash: t.base.transaction_hash,
            block_number: t.base.block_number,
            log_index: t.base.log_index,
            contract_address: t.base.contract_address,
            from_address: t.from_address,
            to_address: t.to_address,
            value: t.value,
            value_hex: format!("{:#x}", t.value),
            timestamp: t.base.timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Erc20Summary {
    pub total_transfers: usize,
    pub total_volume: Amount,
    pub unique_addresses: usize,
    pub top_transfers: Vec<TransferRecord>,
    /// `YYYY-MM-DDTHH` → volume.
    pub hourly_volume: BTreeMap<String, Amount>,
    /// Checksummed address → transfers sent or received, in first-seen order.
    pub address_activity: IndexMap<String, u64>,
    /// Transfer logs that failed to decode.
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Erc20Report {
    pub contract_type: &'static str,
    pub events: Vec<TransferRecord>,
    pub summary: Erc20Summary,
    pub transformation_timestamp: DateTime<Utc>,
}

// ─── Uniswap ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UniswapSummary {
    pub total_swaps: usize,
    pub total_initializations: usize,
    pub total_liquidity_changes: usize,
    pub unique_pools: usize,
    pub trading_volume_events: usize,
    pub new_pools_created: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UniswapReport {
    pub contract_type: &'static str,
    pub swap_events: Vec<UniswapSwapEvent>,
    pub initialize_events: Vec<UniswapInitializeEvent>,
    pub liquidity_events: Vec<UniswapModifyLiquidityEvent>,
    pub summary: UniswapSummary,
    pub transformation_timestamp: DateTime<Utc>,
}

// ─── Generic ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct GenericReport {
    pub contract_type: &'static str,
    pub events: Vec<RawLog>,
    pub event_count: usize,
    pub transformation_timestamp: DateTime<Utc>,
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UtilizationStatus {
    Low,
    Moderate,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkHealth {
    pub utilization_status: UtilizationStatus,
    pub transaction_throughput: usize,
    pub is_full_block: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockReport {
    pub block_number: u64,
    pub block_hash: B256,
    pub timestamp: DateTime<Utc>,
    pub transaction_count: usize,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub gas_utilization_percent: f64,
    pub block_size: Option<u64>,
    pub network_health: NetworkHealth,
}

// ─── Analytics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityPeriod {
    /// `YYYY-MM-DDTHH`
    pub hour: String,
    pub event_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemporalAnalysis {
    pub time_range_covered: Option<TimeRange>,
    pub peak_activity_periods: Vec<ActivityPeriod>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Analytics {
    pub total_events_processed: usize,
    pub contracts_analyzed: usize,
    pub event_distribution: IndexMap<String, usize>,
    pub skipped_logs: usize,
    pub temporal_analysis: TemporalAnalysis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_sums_beyond_u256() {
        let mut a = Amount::default();
        a += U256::MAX;
        a += U256::from(1u8);
        let v = serde_json::to_value(a).unwrap();
        // 2^256
        assert_eq!(
            v,
            "115792089237316195423570985008687907853269984665640564039457584007913129639936"
        );
    }

    #[test]
    fn empty_block_section_is_empty_object() {
        let v = serde_json::to_value(BlockSection::default()).unwrap();
        assert_eq!(v, serde_json::json!({}));
    }

    #[test]
    fn status_serialises_lowercase() {
        assert_eq!(
            serde_json::to_value(UtilizationStatus::Critical).unwrap(),
            "critical"
        );
    }
}
