//! `Transformer`: offline decoding and aggregation of an extracted bundle.
//!
//! Each contract's batch is classified by sampling its first few logs, then
//! decoded with the same [`LogDecoder`] the live path uses. Logs that fail to
//! decode are skipped from the aggregates and counted; nothing in a batch can
//! abort the transformation.
//!
//! Timestamps come from the log itself when the extractor embedded one, else
//! the bundle's extraction timestamp, else the Unix epoch.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

use chainevents_core::{
    event::unix_to_utc, BlockData, ChainEvent, EventKind, EventSource, LogDecoder, RawLog,
};

use crate::bundle::ExtractedBundle;
use crate::report::{
    ActivityPeriod, Analytics, BlockReport, BlockSection, ContractReport, Erc20Report,
    Erc20Summary, GenericReport, Metadata, NetworkHealth, TemporalAnalysis, TimeRange,
    TransferRecord, TransformedBundle, UniswapReport, UniswapSummary, UtilizationStatus,
};

/// Key used by [`Transformer::transform_erc20_only`].
pub const ERC20_ONLY_KEY: &str = "erc20_transfers";
/// Key used by [`Transformer::transform_uniswap_only`].
pub const UNISWAP_ONLY_KEY: &str = "uniswap_events";

const PEAK_PERIODS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Length of `top_transfers`.
    pub top_n: usize,
    /// Logs inspected from the head of a batch when classifying it.
    pub classify_sample: usize,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            classify_sample: 5,
        }
    }
}

/// How a contract's batch is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractClass {
    Erc20,
    Uniswap,
    Generic,
}

#[derive(Debug, Clone, Default)]
pub struct Transformer {
    decoder: LogDecoder,
    options: TransformOptions,
}

impl Transformer {
    pub fn new(decoder: LogDecoder, options: TransformOptions) -> Self {
        Self { decoder, options }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// ERC-20 if any sampled log is a Transfer, else Uniswap if any sampled
    /// log is a Uniswap event, else generic.
    pub fn classify(&self, logs: &[RawLog]) -> ContractClass {
        let sample = &logs[..logs.len().min(self.options.classify_sample)];
        let kinds: Vec<EventKind> = sample.iter().map(|l| self.decoder.classify(l)).collect();
        if kinds.contains(&EventKind::Erc20Transfer) {
            ContractClass::Erc20
        } else if kinds.iter().any(EventKind::is_uniswap) {
            ContractClass::Uniswap
        } else {
            ContractClass::Generic
        }
    }

    /// Transform every non-empty contract batch according to its class.
    pub fn transform(&self, bundle: &ExtractedBundle) -> TransformedBundle {
        let now = Utc::now();
        let fallback = bundle.extraction_timestamp;
        info!(
            contracts = bundle.events.len(),
            logs = bundle.total_logs(),
            "transforming bundle"
        );

        let mut reports = IndexMap::new();
        let mut timestamps = Vec::new();
        for (contract, logs) in &bundle.events {
            if logs.is_empty() {
                continue;
            }
            let class = self.classify(logs);
            debug!(contract = %contract, class = ?class, logs = logs.len(), "classified batch");
            let report = match class {
                ContractClass::Erc20 => ContractReport::Erc20(self.erc20_report(
                    contract,
                    logs.iter(),
                    fallback,
                    now,
                    &mut timestamps,
                )),
                ContractClass::Uniswap => ContractReport::Uniswap(self.uniswap_report(
                    contract,
                    logs.iter(),
                    fallback,
                    now,
                    &mut timestamps,
                )),
                ContractClass::Generic => {
                    timestamps.extend(logs.iter().map(|l| resolve_timestamp(l, fallback)));
                    ContractReport::Generic(generic_report(logs, now))
                }
            };
            reports.insert(contract.clone(), report);
        }

        self.assemble(bundle, reports, timestamps, now)
    }

    /// Every ERC-20 Transfer in the bundle, across contracts, in one report.
    pub fn transform_erc20_only(&self, bundle: &ExtractedBundle) -> TransformedBundle {
        let now = Utc::now();
        let mut timestamps = Vec::new();
        let transfers = bundle
            .all_logs()
            .filter(|l| self.decoder.classify(l) == EventKind::Erc20Transfer);
        let report = self.erc20_report(
            ERC20_ONLY_KEY,
            transfers,
            bundle.extraction_timestamp,
            now,
            &mut timestamps,
        );

        let mut reports = IndexMap::new();
        reports.insert(ERC20_ONLY_KEY.to_string(), ContractReport::Erc20(report));
        self.assemble(bundle, reports, timestamps, now)
    }

    /// Every Uniswap event in the bundle, across contracts, in one report.
    pub fn transform_uniswap_only(&self, bundle: &ExtractedBundle) -> TransformedBundle {
        let now = Utc::now();
        let mut timestamps = Vec::new();
        let events = bundle
            .all_logs()
            .filter(|l| self.decoder.classify(l).is_uniswap());
        let report = self.uniswap_report(
            UNISWAP_ONLY_KEY,
            events,
            bundle.extraction_timestamp,
            now,
            &mut timestamps,
        );

        let mut reports = IndexMap::new();
        reports.insert(UNISWAP_ONLY_KEY.to_string(), ContractReport::Uniswap(report));
        self.assemble(bundle, reports, timestamps, now)
    }

    // ─── Per-class reports ───────────────────────────────────────────────────

    fn erc20_report<'a>(
        &self,
        contract: &str,
        logs: impl Iterator<Item = &'a RawLog>,
        fallback: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        timestamps: &mut Vec<DateTime<Utc>>,
    ) -> Erc20Report {
        let mut records = Vec::new();
        let mut summary = Erc20Summary::default();
        let mut addresses: HashSet<Address> = HashSet::new();

        for log in logs {
            if self.decoder.classify(log) != EventKind::Erc20Transfer {
                continue;
            }
            let ts = resolve_timestamp(log, fallback);
            let transfer = match self.decoder.decode(log, source_for(log, contract), ts) {
                Ok(ChainEvent::Erc20Transfer(t)) => t,
                Ok(_) => continue,
                Err(e) => {
                    warn!(contract = %contract, tx = %log.transaction_hash, error = %e, "skipping transfer log");
                    summary.skipped += 1;
                    continue;
                }
            };
            let record = TransferRecord::from(&transfer);

            summary.total_volume += record.value;
            *summary.hourly_volume.entry(hour_key(&record.timestamp)).or_default() +=
                record.value;
            for addr in [record.from_address, record.to_address] {
                addresses.insert(addr);
                *summary
                    .address_activity
                    .entry(addr.to_checksum(None))
                    .or_insert(0) += 1;
            }
            timestamps.push(record.timestamp);
            records.push(record);
        }

        summary.total_transfers = records.len();
        summary.unique_addresses = addresses.len();
        let mut top = records.clone();
        // `sort_by` is stable: equal values keep input order.
        top.sort_by(|a, b| b.value.cmp(&a.value));
        top.truncate(self.options.top_n);
        summary.top_transfers = top;

        info!(
            contract = %contract,
            transfers = summary.total_transfers,
            skipped = summary.skipped,
            "transformed ERC-20 batch"
        );
        Erc20Report {
            contract_type: "erc20",
            events: records,
            summary,
            transformation_timestamp: now,
        }
    }

    fn uniswap_report<'a>(
        &self,
        contract: &str,
        logs: impl Iterator<Item = &'a RawLog>,
        fallback: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        timestamps: &mut Vec<DateTime<Utc>>,
    ) -> UniswapReport {
        let mut report = UniswapReport {
            contract_type: "uniswap",
            swap_events: Vec::new(),
            initialize_events: Vec::new(),
            liquidity_events: Vec::new(),
            summary: UniswapSummary::default(),
            transformation_timestamp: now,
        };
        let mut pools = HashSet::new();

        for log in logs {
            if !self.decoder.classify(log).is_uniswap() {
                continue;
            }
            let ts = resolve_timestamp(log, fallback);
            match self.decoder.decode(log, source_for(log, contract), ts) {
                Ok(ChainEvent::UniswapSwap(e)) => {
                    pools.insert(e.pool_id);
                    report.swap_events.push(e);
                }
                Ok(ChainEvent::UniswapInitialize(e)) => {
                    pools.insert(e.pool_id);
                    report.initialize_events.push(e);
                }
                Ok(ChainEvent::UniswapModifyLiquidity(e)) => {
                    pools.insert(e.pool_id);
                    report.liquidity_events.push(e);
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(contract = %contract, tx = %log.transaction_hash, error = %e, "skipping Uniswap log");
                    report.summary.skipped += 1;
                    continue;
                }
            }
            timestamps.push(ts);
        }

        let s = &mut report.summary;
        s.total_swaps = report.swap_events.len();
        s.total_initializations = report.initialize_events.len();
        s.total_liquidity_changes = report.liquidity_events.len();
        s.unique_pools = pools.len();
        s.trading_volume_events = s.total_swaps;
        s.new_pools_created = s.total_initializations;

        info!(
            contract = %contract,
            swaps = s.total_swaps,
            initializations = s.total_initializations,
            liquidity_changes = s.total_liquidity_changes,
            skipped = s.skipped,
            "transformed Uniswap batch"
        );
        report
    }

    // ─── Assembly ────────────────────────────────────────────────────────────

    fn assemble(
        &self,
        bundle: &ExtractedBundle,
        reports: IndexMap<String, ContractReport>,
        timestamps: Vec<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> TransformedBundle {
        let transformed_blocks = match &bundle.latest_block {
            Some(b) => BlockSection {
                transformed_block: Some(transform_block(&b.raw_block_data)),
                transformation_timestamp: Some(now),
            },
            None => BlockSection::default(),
        };

        let analytics = analytics(&reports, &timestamps);
        TransformedBundle {
            metadata: Metadata {
                original_extraction_timestamp: bundle.extraction_timestamp,
                transformation_timestamp: now,
                block_range: bundle.block_range,
                summary: bundle.summary.clone(),
            },
            transformed_blocks,
            transformed_events: reports,
            analytics,
        }
    }
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

/// Gas figures and network-health banding for one block.
pub fn transform_block(block: &BlockData) -> BlockReport {
    let (percent, status, full) = if block.gas_limit == 0 {
        (0.0, UtilizationStatus::Low, false)
    } else {
        let used = u128::from(block.gas_used) * 100;
        let limit = u128::from(block.gas_limit);
        let status = if used < 50 * limit {
            UtilizationStatus::Low
        } else if used < 80 * limit {
            UtilizationStatus::Moderate
        } else if used < 95 * limit {
            UtilizationStatus::High
        } else {
            UtilizationStatus::Critical
        };
        let percent = block.gas_used as f64 / block.gas_limit as f64 * 100.0;
        ((percent * 100.0).round() / 100.0, status, used > 95 * limit)
    };

    BlockReport {
        block_number: block.number,
        block_hash: block.hash,
        timestamp: unix_to_utc(block.timestamp),
        transaction_count: block.transaction_count(),
        gas_used: block.gas_used,
        gas_limit: block.gas_limit,
        gas_utilization_percent: percent,
        block_size: block.size,
        network_health: NetworkHealth {
            utilization_status: status,
            transaction_throughput: block.transaction_count(),
            is_full_block: full,
        },
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn generic_report(logs: &[RawLog], now: DateTime<Utc>) -> GenericReport {
    GenericReport {
        contract_type: "generic",
        events: logs.to_vec(),
        event_count: logs.len(),
        transformation_timestamp: now,
    }
}

fn resolve_timestamp(log: &RawLog, fallback: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match (log.timestamp, fallback) {
        (Some(secs), _) => unix_to_utc(secs),
        (None, Some(ts)) => ts,
        (None, None) => DateTime::UNIX_EPOCH,
    }
}

/// Annotated names win; the bundle key stands in for a missing contract name.
fn source_for<'a>(log: &'a RawLog, contract: &'a str) -> EventSource<'a> {
    EventSource::new(
        log.contract_name.as_deref().unwrap_or(contract),
        log.event_name.as_deref().unwrap_or(""),
    )
}

fn hour_key(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H").to_string()
}

fn analytics(reports: &IndexMap<String, ContractReport>, timestamps: &[DateTime<Utc>]) -> Analytics {
    let mut out = Analytics {
        contracts_analyzed: reports.len(),
        ..Default::default()
    };
    for (name, report) in reports {
        let n = report.event_count();
        out.event_distribution.insert(name.clone(), n);
        out.total_events_processed += n;
        out.skipped_logs += report.skipped();
    }
    out.temporal_analysis = temporal_analysis(timestamps);
    out
}

fn temporal_analysis(timestamps: &[DateTime<Utc>]) -> TemporalAnalysis {
    let time_range_covered = match (timestamps.iter().min(), timestamps.iter().max()) {
        (Some(start), Some(end)) => Some(TimeRange {
            start: *start,
            end: *end,
        }),
        _ => None,
    };

    let mut per_hour: BTreeMap<String, usize> = BTreeMap::new();
    for ts in timestamps {
        *per_hour.entry(hour_key(ts)).or_default() += 1;
    }
    let mut periods: Vec<ActivityPeriod> = per_hour
        .into_iter()
        .map(|(hour, event_count)| ActivityPeriod { hour, event_count })
        .collect();
    // Hours arrive in ascending order, so a stable sort breaks ties by the earlier hour.
    periods.sort_by(|a, b| b.event_count.cmp(&a.event_count));
    periods.truncate(PEAK_PERIODS);

    TemporalAnalysis {
        time_range_covered,
        peak_activity_periods: periods,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, B256, U256};
    use chainevents_core::signatures::{ERC20_APPROVAL, ERC20_TRANSFER, UNISWAP_SWAP};

    fn log(sig: B256, topics: usize) -> RawLog {
        let mut t = vec![sig];
        t.extend((1..topics).map(|i| B256::with_last_byte(i as u8)));
        RawLog {
            address: Address::repeat_byte(0xaa),
            topics: t,
            data: Bytes::from(U256::from(5u8).to_be_bytes::<32>().to_vec()),
            block_number: 1,
            block_hash: None,
            transaction_hash: B256::ZERO,
            log_index: 0,
            timestamp: None,
            removed: None,
            contract_name: None,
            event_name: None,
            event_signature: None,
        }
    }

    fn block(gas_used: u64, gas_limit: u64) -> BlockData {
        BlockData {
            number: 7,
            hash: B256::ZERO,
            parent_hash: B256::ZERO,
            timestamp: 1_700_000_000,
            gas_used,
            gas_limit,
            transactions: vec![],
            size: Some(1_024),
            miner: None,
        }
    }

    #[test]
    fn classification_samples_the_prefix() {
        let t = Transformer::default();
        let mut logs: Vec<RawLog> = (0..5).map(|_| log(ERC20_APPROVAL, 3)).collect();
        logs.push(log(ERC20_TRANSFER, 3));
        // The transfer sits outside the five-log sample.
        assert_eq!(t.classify(&logs), ContractClass::Generic);

        logs.insert(2, log(UNISWAP_SWAP, 2));
        assert_eq!(t.classify(&logs), ContractClass::Uniswap);

        logs.insert(0, log(ERC20_TRANSFER, 3));
        assert_eq!(t.classify(&logs), ContractClass::Erc20);
    }

    #[test]
    fn utilization_bands_are_upper_inclusive() {
        let status = |used| transform_block(&block(used, 1_000)).network_health.utilization_status;
        assert_eq!(status(499), UtilizationStatus::Low);
        assert_eq!(status(500), UtilizationStatus::Moderate);
        assert_eq!(status(800), UtilizationStatus::High);
        assert_eq!(status(950), UtilizationStatus::Critical);
    }

    #[test]
    fn full_block_needs_more_than_95_percent() {
        assert!(!transform_block(&block(950, 1_000)).network_health.is_full_block);
        assert!(transform_block(&block(951, 1_000)).network_health.is_full_block);
    }

    #[test]
    fn utilization_rounds_to_two_decimals() {
        let r = transform_block(&block(1, 3));
        assert_eq!(r.gas_utilization_percent, 33.33);
    }

    #[test]
    fn zero_gas_limit_is_low() {
        let r = transform_block(&block(10, 0));
        assert_eq!(r.gas_utilization_percent, 0.0);
        assert_eq!(r.network_health.utilization_status, UtilizationStatus::Low);
        assert!(!r.network_health.is_full_block);
    }

    #[test]
    fn peak_hours_break_ties_by_earlier_hour() {
        let at = |h: u32, m: u32| {
            "2024-05-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
                + chrono::Duration::hours(h.into())
                + chrono::Duration::minutes(m.into())
        };
        let ts = vec![at(3, 0), at(1, 0), at(1, 5), at(2, 0), at(3, 9), at(0, 1)];
        let t = temporal_analysis(&ts);
        let hours: Vec<_> = t
            .peak_activity_periods
            .iter()
            .map(|p| (p.hour.as_str(), p.event_count))
            .collect();
        assert_eq!(
            hours,
            vec![("2024-05-01T01", 2), ("2024-05-01T03", 2), ("2024-05-01T00", 1)]
        );
        let range = t.time_range_covered.unwrap();
        assert_eq!(range.start, at(0, 1));
        assert_eq!(range.end, at(3, 9));
    }

    #[test]
    fn no_timestamps_no_range() {
        let t = temporal_analysis(&[]);
        assert!(t.time_range_covered.is_none());
        assert!(t.peak_activity_periods.is_empty());
    }
}
