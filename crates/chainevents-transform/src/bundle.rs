//! Batch-path input: the bundle produced by extraction.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use chainevents_core::{BlockData, RawLog};

/// The block range an extraction covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpan {
    pub from_block: u64,
    pub to_block: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub total_events: usize,
    pub contracts_monitored: usize,
    pub active_events: usize,
}

/// The head block captured alongside the logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedBlock {
    pub block_number: u64,
    pub raw_block_data: BlockData,
}

/// Raw logs grouped by contract name, in watch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedBundle {
    #[serde(default)]
    pub extraction_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub block_range: Option<BlockSpan>,
    #[serde(default)]
    pub latest_block: Option<ExtractedBlock>,
    #[serde(default)]
    pub events: IndexMap<String, Vec<RawLog>>,
    #[serde(default)]
    pub summary: Option<ExtractionSummary>,
}

impl ExtractedBundle {
    pub fn total_logs(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn all_logs(&self) -> impl Iterator<Item = &RawLog> {
        self.events.values().flatten()
    }
}
