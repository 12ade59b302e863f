//! `Extractor`: pulls a block range from a node into an [`ExtractedBundle`].
//!
//! One `eth_getLogs` call per enabled (contract, event) pair. Each log is
//! annotated with the contract and event it was requested for and stamped
//! with its block's timestamp, so the bundle can be transformed offline.

use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use chainevents_core::{BlockTag, ContractWatch, NodeClient, RawLog};

use crate::bundle::{BlockSpan, ExtractedBlock, ExtractedBundle, ExtractionSummary};
use crate::error::ExtractError;

pub struct Extractor<C: NodeClient + ?Sized> {
    client: Arc<C>,
    watches: Vec<ContractWatch>,
}

impl<C: NodeClient + ?Sized> Extractor<C> {
    pub fn new(client: Arc<C>, watches: Vec<ContractWatch>) -> Self {
        Self { client, watches }
    }

    /// The last `block_count` blocks up to the current head.
    pub async fn extract_recent(&self, block_count: u64) -> Result<ExtractedBundle, ExtractError> {
        let head = self.client.latest_block_number().await?;
        let from = head.saturating_sub(block_count);
        info!(from, to = head, block_count, "extracting recent blocks");
        self.extract(from, head, head, Some(block_count)).await
    }

    /// An explicit inclusive range. The head block is still captured.
    pub async fn extract_range(&self, from: u64, to: u64) -> Result<ExtractedBundle, ExtractError> {
        if from > to {
            return Err(ExtractError::InvalidRange { from, to });
        }
        let head = self.client.latest_block_number().await?;
        info!(from, to, head, "extracting block range");
        self.extract(from, to, head, None).await
    }

    async fn extract(
        &self,
        from: u64,
        to: u64,
        head: u64,
        block_count: Option<u64>,
    ) -> Result<ExtractedBundle, ExtractError> {
        let extraction_timestamp = Utc::now();
        let latest_block = self
            .client
            .block(head, false)
            .await?
            .map(|raw_block_data| ExtractedBlock {
                block_number: head,
                raw_block_data,
            });
        let mut block_times: HashMap<u64, Option<u64>> = HashMap::new();
        if let Some(b) = &latest_block {
            block_times.insert(b.block_number, Some(b.raw_block_data.timestamp));
        }

        let mut events: IndexMap<String, Vec<RawLog>> = IndexMap::new();
        let mut active_events = 0;
        for watch in &self.watches {
            let batch = events.entry(watch.name.clone()).or_default();
            for event in watch.enabled_events() {
                active_events += 1;
                let filter = watch
                    .filter_for(event)
                    .range(BlockTag::Number(from), BlockTag::Number(to));
                let logs = match self.client.logs(&filter).await {
                    Ok(logs) => logs,
                    Err(e) => {
                        warn!(
                            contract = %watch.name,
                            event = %event.name,
                            error = %e,
                            "getLogs failed, skipping"
                        );
                        continue;
                    }
                };
                debug!(contract = %watch.name, event = %event.name, logs = logs.len(), "extracted logs");

                for mut log in logs {
                    if log.timestamp.is_none() {
                        log.timestamp = self.block_time(log.block_number, &mut block_times).await;
                    }
                    log.contract_name = Some(watch.name.clone());
                    log.event_name = Some(event.name.clone());
                    log.event_signature = Some(event.signature);
                    batch.push(log);
                }
            }
        }

        let summary = ExtractionSummary {
            total_events: events.values().map(Vec::len).sum(),
            contracts_monitored: self.watches.len(),
            active_events,
        };
        info!(
            total_events = summary.total_events,
            contracts = summary.contracts_monitored,
            "extraction complete"
        );

        Ok(ExtractedBundle {
            extraction_timestamp: Some(extraction_timestamp),
            block_range: Some(BlockSpan {
                from_block: from,
                to_block: to,
                block_count,
            }),
            latest_block,
            events,
            summary: Some(summary),
        })
    }

    /// Block timestamp, fetched at most once per block. Failures leave the
    /// log unstamped.
    async fn block_time(&self, number: u64, cache: &mut HashMap<u64, Option<u64>>) -> Option<u64> {
        if let Some(ts) = cache.get(&number) {
            return *ts;
        }
        let ts = match self.client.block(number, false).await {
            Ok(block) => block.map(|b| b.timestamp),
            Err(e) => {
                warn!(block = number, error = %e, "block timestamp lookup failed");
                None
            }
        };
        cache.insert(number, ts);
        ts
    }
}
