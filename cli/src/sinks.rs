//! Output sinks for transformed bundles and live events.
//!
//! Sinks take the bundle as a JSON tree so `load` works on any file that
//! follows the `metadata` / `transformed_blocks` / `transformed_events` /
//! `analytics` layout, not only bundles produced by this build.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use chainevents_core::ChainEvent;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("webhook returned HTTP {status}")]
    Status { status: u16 },

    #[error("webhook rejected {failed} of {total} chunks")]
    Chunks { failed: usize, total: usize },
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, bundle: &Value) -> Result<(), SinkError>;
}

/// Per-sink outcome of a fan-out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Hand `bundle` to every sink in turn; a failing sink does not stop the rest.
pub async fn load_all(sinks: &[Box<dyn Sink>], bundle: &Value) -> LoadReport {
    let mut report = LoadReport::default();
    for sink in sinks {
        match sink.load(bundle).await {
            Ok(()) => {
                info!(sink = sink.name(), "bundle loaded");
                report.succeeded.push(sink.name().to_string());
            }
            Err(e) => {
                error!(sink = sink.name(), error = %e, "sink failed");
                report.failed.push((sink.name().to_string(), e.to_string()));
            }
        }
    }
    report
}

// ─── Console ─────────────────────────────────────────────────────────────────

pub struct ConsoleSink;

impl ConsoleSink {
    /// Human-readable report of a transformed bundle.
    pub fn render(bundle: &Value) -> String {
        let mut out = String::new();
        let rule = "=".repeat(80);
        let _ = writeln!(out, "{rule}\nETHEREUM EVENT ANALYSIS REPORT\n{rule}");

        let meta = &bundle["metadata"];
        let _ = writeln!(out, "Extraction time:     {}", text(&meta["original_extraction_timestamp"]));
        let _ = writeln!(out, "Transformation time: {}", text(&meta["transformation_timestamp"]));
        let range = &meta["block_range"];
        if range.is_object() {
            let _ = writeln!(
                out,
                "Block range:         {} - {}",
                text(&range["from_block"]),
                text(&range["to_block"])
            );
        }

        let block = &bundle["transformed_blocks"]["transformed_block"];
        if block.is_object() {
            let health = &block["network_health"];
            let _ = writeln!(out, "\n--- LATEST BLOCK ---");
            let _ = writeln!(out, "Block:           {}", text(&block["block_number"]));
            let _ = writeln!(out, "Transactions:    {}", text(&block["transaction_count"]));
            let _ = writeln!(
                out,
                "Gas:             {} / {} ({}%)",
                text(&block["gas_used"]),
                text(&block["gas_limit"]),
                text(&block["gas_utilization_percent"])
            );
            let _ = writeln!(
                out,
                "Network status:  {}",
                text(&health["utilization_status"]).to_uppercase()
            );
            if health["is_full_block"].as_bool() == Some(true) {
                let _ = writeln!(out, "WARNING: block is nearly full");
            }
        }

        if let Some(contracts) = bundle["transformed_events"].as_object() {
            for (name, report) in contracts {
                let _ = writeln!(out, "\n--- {} ({}) ---", name.to_uppercase(), text(&report["contract_type"]));
                let s = &report["summary"];
                match report["contract_type"].as_str() {
                    Some("erc20") => {
                        let _ = writeln!(out, "Transfers:        {}", text(&s["total_transfers"]));
                        let _ = writeln!(out, "Total volume:     {}", text(&s["total_volume"]));
                        let _ = writeln!(out, "Unique addresses: {}", text(&s["unique_addresses"]));
                        if let Some(top) = s["top_transfers"].as_array() {
                            for (i, t) in top.iter().take(5).enumerate() {
                                let _ = writeln!(
                                    out,
                                    "  {}. {} from {} to {}",
                                    i + 1,
                                    text(&t["value"]),
                                    text(&t["from_address"]),
                                    text(&t["to_address"])
                                );
                            }
                        }
                    }
                    Some("uniswap") => {
                        let _ = writeln!(out, "Swaps:             {}", text(&s["total_swaps"]));
                        let _ = writeln!(out, "Initializations:   {}", text(&s["total_initializations"]));
                        let _ = writeln!(out, "Liquidity changes: {}", text(&s["total_liquidity_changes"]));
                        let _ = writeln!(out, "Unique pools:      {}", text(&s["unique_pools"]));
                    }
                    _ => {
                        let _ = writeln!(out, "Events: {}", text(&report["event_count"]));
                    }
                }
            }
        }

        let analytics = &bundle["analytics"];
        if analytics.is_object() {
            let total = analytics["total_events_processed"].as_u64().unwrap_or(0);
            let _ = writeln!(out, "\n--- CROSS-CONTRACT ANALYTICS ---");
            let _ = writeln!(out, "Events processed:   {total}");
            let _ = writeln!(out, "Contracts analyzed: {}", text(&analytics["contracts_analyzed"]));
            if let Some(dist) = analytics["event_distribution"].as_object() {
                for (name, count) in dist {
                    let n = count.as_u64().unwrap_or(0);
                    let pct = if total == 0 { 0.0 } else { n as f64 / total as f64 * 100.0 };
                    let _ = writeln!(out, "  {name}: {n} events ({pct:.1}%)");
                }
            }
        }
        let _ = write!(out, "{rule}");
        out
    }

    /// One line for a live event.
    pub fn event_line(event: &ChainEvent) -> String {
        match event {
            ChainEvent::Erc20Transfer(t) => format!(
                "[block {}] {} {} {} -> {} value={}",
                t.base.block_number,
                t.token_symbol.as_deref().unwrap_or("?"),
                t.base.event_name,
                t.from_address,
                t.to_address,
                t.value
            ),
            ChainEvent::Block(b) => format!(
                "[block {}] txs={} gas={:.2}%",
                b.block_number,
                b.transaction_count,
                b.gas_utilization()
            ),
            other => format!(
                "[block {}] {} {}",
                other.block_number(),
                other.kind(),
                other.event_name()
            ),
        }
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn load(&self, bundle: &Value) -> Result<(), SinkError> {
        println!("{}", Self::render(bundle));
        Ok(())
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::Null => "unknown".into(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── File ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FileFormat {
    /// The whole bundle as pretty JSON.
    #[default]
    Json,
    /// One CSV of event rows per contract, plus a metric summary.
    Csv,
}

pub struct FileSink {
    path: PathBuf,
    format: FileFormat,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: FileFormat::Json,
        }
    }

    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    /// `transformed_data_<YYYYmmdd_HHMMSS>.json` inside `dir`.
    pub fn timestamped(dir: &Path, now: DateTime<Utc>) -> Self {
        Self::new(dir.join(default_file_name("transformed_data", now)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn default_file_name(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{prefix}_{}.json", now.format("%Y%m%d_%H%M%S"))
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, bundle: &Value) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        match self.format {
            FileFormat::Json => {
                let body = serde_json::to_vec_pretty(bundle)?;
                tokio::fs::write(&self.path, body).await?;
                info!(path = %self.path.display(), "bundle written");
            }
            FileFormat::Csv => {
                for (path, body) in self.csv_files(bundle)? {
                    tokio::fs::write(&path, body).await?;
                    info!(path = %path.display(), "csv written");
                }
            }
        }
        Ok(())
    }
}

impl FileSink {
    /// `<stem>_<contract>.csv` for every contract with events, then
    /// `<stem>_summary.csv`, all next to `path`.
    fn csv_files(&self, bundle: &Value) -> Result<Vec<(PathBuf, Vec<u8>)>, SinkError> {
        let stem = self
            .path
            .file_stem()
            .map_or_else(|| "data".to_string(), |s| s.to_string_lossy().into_owned());
        let sibling = |suffix: &str| self.path.with_file_name(format!("{stem}_{suffix}.csv"));

        let mut files = Vec::new();
        if let Some(contracts) = bundle["transformed_events"].as_object() {
            for (name, report) in contracts {
                let (header, rows) = event_table(report);
                if rows.is_empty() {
                    continue;
                }
                let mut w = csv::Writer::from_writer(Vec::new());
                w.write_record(&header)?;
                for row in &rows {
                    w.write_record(row)?;
                }
                files.push((sibling(&file_safe(name)), finish(w)?));
            }
        }

        let meta = &bundle["metadata"];
        let analytics = &bundle["analytics"];
        let mut w = csv::Writer::from_writer(Vec::new());
        w.write_record(["metric", "value"])?;
        for (metric, value) in [
            ("original_extraction_timestamp", &meta["original_extraction_timestamp"]),
            ("transformation_timestamp", &meta["transformation_timestamp"]),
            ("contracts_analyzed", &analytics["contracts_analyzed"]),
            ("total_events", &analytics["total_events_processed"]),
        ] {
            w.write_record([metric, cell(value).as_str()])?;
        }
        files.push((sibling("summary"), finish(w)?));
        Ok(files)
    }
}

fn finish(w: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, SinkError> {
    w.into_inner()
        .map_err(|e| SinkError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
}

/// Event arrays of a contract report, by key. ERC20 and generic reports
/// carry `events`; Uniswap reports split them by kind.
const EVENT_SECTIONS: [&str; 4] = ["events", "swap_events", "initialize_events", "liquidity_events"];

fn event_sections(report: &Value) -> impl Iterator<Item = (&'static str, &Vec<Value>)> {
    EVENT_SECTIONS
        .into_iter()
        .filter_map(move |key| report[key].as_array().map(|events| (key, events)))
}

/// Flatten every event of `report` into rows. Columns are `section` then
/// the union of event keys in first-seen order; nested values are written
/// as compact JSON.
fn event_table(report: &Value) -> (Vec<String>, Vec<Vec<String>>) {
    let mut header = vec!["section".to_string()];
    for (_, events) in event_sections(report) {
        for key in events.iter().filter_map(Value::as_object).flat_map(|o| o.keys()) {
            if !header.iter().any(|h| h == key) {
                header.push(key.clone());
            }
        }
    }
    let rows = event_sections(report)
        .flat_map(|(section, events)| events.iter().map(move |e| (section, e)))
        .map(|(section, event)| {
            header
                .iter()
                .enumerate()
                .map(|(i, col)| if i == 0 { section.to_string() } else { cell(&event[col.as_str()]) })
                .collect()
        })
        .collect();
    (header, rows)
}

fn cell(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

// ─── Webhook ─────────────────────────────────────────────────────────────────

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// POSTs a bundle as a series of chunks of at most `chunk_size` events.
pub struct WebhookSink {
    url: String,
    http: reqwest::Client,
    chunk_size: usize,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn post(&self, chunk: &Value) -> Result<(), SinkError> {
        let resp = self.http.post(&self.url).json(chunk).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Split a bundle for transmission.
///
/// Each chunk carries `metadata` and `analytics`, one contract's name, a
/// slice of one of its event arrays and a `chunk_info` locating the slice.
/// A bundle without events becomes a single chunk holding the block section.
pub fn chunk_bundle(bundle: &Value, chunk_size: usize) -> Vec<Value> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    if let Some(contracts) = bundle["transformed_events"].as_object() {
        for (name, report) in contracts {
            for (section, events) in event_sections(report) {
                for (n, slice) in events.chunks(chunk_size).enumerate() {
                    let start = n * chunk_size;
                    chunks.push(json!({
                        "metadata": bundle["metadata"],
                        "analytics": bundle["analytics"],
                        "contract_name": name,
                        "section": section,
                        "events": slice,
                        "event_count": slice.len(),
                        "chunk_info": {
                            "chunk_index": chunks.len(),
                            "start_index": start,
                            "end_index": start + slice.len(),
                            "total_events": events.len(),
                        },
                    }));
                }
            }
        }
    }
    if chunks.is_empty() {
        chunks.push(json!({
            "metadata": bundle["metadata"],
            "analytics": bundle["analytics"],
            "transformed_blocks": bundle["transformed_blocks"],
            "event_count": 0,
            "chunk_info": {},
        }));
    }
    let total = chunks.len();
    for chunk in &mut chunks {
        if let Some(info) = chunk["chunk_info"].as_object_mut() {
            info.insert("total_chunks".into(), total.into());
        }
    }
    chunks
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    /// Every chunk is attempted; a rejected chunk does not stop the rest.
    async fn load(&self, bundle: &Value) -> Result<(), SinkError> {
        let chunks = chunk_bundle(bundle, self.chunk_size);
        let total = chunks.len();
        let mut failures = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            match self.post(chunk).await {
                Ok(()) => info!(chunk = i + 1, total, "webhook chunk sent"),
                Err(e) => {
                    warn!(chunk = i + 1, total, error = %e, "webhook chunk failed");
                    failures.push(e);
                }
            }
        }
        match failures.len() {
            0 => Ok(()),
            1 if total == 1 => Err(failures.remove(0)),
            failed => Err(SinkError::Chunks { failed, total }),
        }
    }
}
