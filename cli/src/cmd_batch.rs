//! `chainevents extract | transform | load`: the batch path.
//!
//! Each step reads and writes plain JSON files, so the steps can run on
//! different machines or be replayed from any intermediate file.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use chainevents_rpc::HttpNodeClient;
use chainevents_transform::{ExtractedBundle, Extractor, Transformer};

use crate::config::AppConfig;
use crate::sinks::{
    default_file_name, load_all, ConsoleSink, FileFormat, FileSink, Sink, WebhookSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    Full,
    Erc20Only,
    UniswapOnly,
}

// ─── Extract ─────────────────────────────────────────────────────────────────

pub async fn extract(
    app: &AppConfig,
    recent: u64,
    range: Option<(u64, u64)>,
    output: Option<&Path>,
) -> Result<()> {
    let watches = app.require_watches().context("nothing to extract")?;
    let client = Arc::new(
        HttpNodeClient::default_for(app.ethereum.node_url.clone())
            .context("building node client")?,
    );
    let extractor = Extractor::new(client, watches);

    let bundle = match range {
        Some((from, to)) => extractor.extract_range(from, to).await,
        None => extractor.extract_recent(recent).await,
    }
    .context("extraction failed")?;

    let path = output_path(output, "extracted_data");
    write_json(&path, &bundle).await?;

    if let Some(span) = &bundle.block_range {
        println!("Extracted blocks {} - {}", span.from_block, span.to_block);
    }
    let summary = bundle.summary.clone().unwrap_or_default();
    println!("Events:    {}", summary.total_events);
    println!("Contracts: {}", summary.contracts_monitored);
    println!("Written:   {}", path.display());
    Ok(())
}

// ─── Transform ───────────────────────────────────────────────────────────────

pub async fn transform(input: &Path, output: Option<&Path>, mode: TransformMode) -> Result<()> {
    let raw = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading '{}'", input.display()))?;
    let bundle: ExtractedBundle = serde_json::from_slice(&raw)
        .with_context(|| format!("'{}' is not an extraction bundle", input.display()))?;
    info!(logs = bundle.total_logs(), contracts = bundle.events.len(), ?mode, "transforming");

    let transformer = Transformer::default();
    let transformed = match mode {
        TransformMode::Full => transformer.transform(&bundle),
        TransformMode::Erc20Only => transformer.transform_erc20_only(&bundle),
        TransformMode::UniswapOnly => transformer.transform_uniswap_only(&bundle),
    };

    let path = output_path(output, "transformed_data");
    write_json(&path, &transformed).await?;

    let analytics = &transformed.analytics;
    println!("Events processed: {}", analytics.total_events_processed);
    println!("Contracts:        {}", analytics.contracts_analyzed);
    if analytics.skipped_logs > 0 {
        println!("Skipped logs:     {}", analytics.skipped_logs);
    }
    println!("Written:          {}", path.display());
    Ok(())
}

// ─── Load ────────────────────────────────────────────────────────────────────

/// Where `load` sends a bundle.
#[derive(Debug, Default)]
pub struct LoadTargets {
    pub console: bool,
    pub file: Option<PathBuf>,
    pub format: FileFormat,
    pub webhook: Option<String>,
    pub chunk_size: usize,
}

pub async fn load(input: &Path, targets: LoadTargets) -> Result<()> {
    let LoadTargets { console, file, format, webhook, chunk_size } = targets;
    let raw = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading '{}'", input.display()))?;
    let bundle: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("'{}' is not valid JSON", input.display()))?;

    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    // Console is the default when nothing else is asked for.
    if console || (file.is_none() && webhook.is_none()) {
        sinks.push(Box::new(ConsoleSink));
    }
    if let Some(path) = file {
        sinks.push(Box::new(FileSink::new(path).with_format(format)));
    }
    if let Some(url) = webhook {
        let sink = WebhookSink::new(url)
            .context("building webhook client")?
            .with_chunk_size(chunk_size);
        sinks.push(Box::new(sink));
    }

    let report = load_all(&sinks, &bundle).await;
    println!(
        "Load complete: {} succeeded, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );
    for (sink, reason) in &report.failed {
        println!("  {sink}: {reason}");
    }
    if report.succeeded.is_empty() {
        bail!("every sink failed");
    }
    Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn output_path(output: Option<&Path>, prefix: &str) -> PathBuf {
    output.map_or_else(|| PathBuf::from(default_file_name(prefix, Utc::now())), Path::to_path_buf)
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tree = serde_json::to_value(value).context("serializing output")?;
    FileSink::new(path)
        .load(&tree)
        .await
        .with_context(|| format!("writing '{}'", path.display()))
}
