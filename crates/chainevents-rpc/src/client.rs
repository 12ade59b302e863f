//! `HttpNodeClient`: [`NodeClient`] over JSON-RPC 2.0 HTTP, backed by `reqwest`.
//!
//! Transport failures (connection errors, timeouts, non-2xx statuses) are
//! retried with exponential backoff. Error objects returned by the node are
//! final and surface as [`NodeError::Rpc`], or [`NodeError::FilterNotFound`]
//! when the node has dropped a filter.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chainevents_core::types::parse_quantity;
use chainevents_core::{BlockData, FilterId, LogFilter, NodeClient, NodeError, RawLog};

use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::retry::{RetryConfig, RetryPolicy};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpNodeClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpNodeClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, NodeError> {
        let url = url.into();
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NodeError::Connection {
                url: url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            url,
            http,
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn default_for(url: impl Into<String>) -> Result<Self, NodeError> {
        Self::new(url, HttpClientConfig::default())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue `method`, retrying transient failures, and decode the result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, NodeError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let mut attempt = 0u32;
        let resp = loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(resp) => break resp,
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            method,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            url = %self.url,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(method, attempt, error = %e, url = %self.url, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        };

        let value = resp.into_result().map_err(|err| {
            if err.is_filter_not_found() {
                let id = req.params.first().and_then(Value::as_str).unwrap_or_default();
                NodeError::FilterNotFound(id.to_string())
            } else {
                NodeError::Rpc {
                    code: err.code,
                    message: err.message,
                }
            }
        })?;
        serde_json::from_value(value)
            .map_err(|e| NodeError::InvalidResponse(format!("{method}: {e}")))
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, NodeError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NodeError::Connection {
                url: self.url.clone(),
                reason: format!("HTTP {}: {body}", status.as_u16()),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| NodeError::InvalidResponse(format!("{}: {e}", req.method)))
    }

    fn transport_error(&self, e: reqwest::Error) -> NodeError {
        if e.is_timeout() {
            NodeError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            NodeError::Connection {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn latest_block_number(&self) -> Result<u64, NodeError> {
        let hex: String = self.call("eth_blockNumber", vec![]).await?;
        parse_quantity(&hex)
            .ok_or_else(|| NodeError::InvalidResponse(format!("eth_blockNumber: bad quantity '{hex}'")))
    }

    async fn block(&self, number: u64, include_txs: bool) -> Result<Option<BlockData>, NodeError> {
        self.call(
            "eth_getBlockByNumber",
            vec![json!(format!("{number:#x}")), json!(include_txs)],
        )
        .await
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, NodeError> {
        self.call("eth_getLogs", vec![filter_param(filter)?]).await
    }

    async fn new_filter(&self, filter: &LogFilter) -> Result<FilterId, NodeError> {
        let id: String = self.call("eth_newFilter", vec![filter_param(filter)?]).await?;
        tracing::debug!(filter = %id, address = %filter.address, "filter installed");
        Ok(FilterId::new(id))
    }

    async fn filter_changes(&self, id: &FilterId) -> Result<Vec<RawLog>, NodeError> {
        self.call("eth_getFilterChanges", vec![json!(id.as_str())]).await
    }

    async fn uninstall_filter(&self, id: &FilterId) -> Result<bool, NodeError> {
        self.call("eth_uninstallFilter", vec![json!(id.as_str())]).await
    }
}

fn filter_param(filter: &LogFilter) -> Result<Value, NodeError> {
    serde_json::to_value(filter).map_err(|e| NodeError::Other(format!("unserialisable filter: {e}")))
}
