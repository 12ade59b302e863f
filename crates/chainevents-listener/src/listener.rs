//! `EventListener`: multiplexes many node-side log filters over one
//! cooperative polling loop.
//!
//! # Lifecycle
//! ```text
//! Idle ──start_listening──► Running ──stop_listening──► Stopping ──► Idle
//! ```
//!
//! # Sweep
//! For each active filter, in subscription order:
//!   - poll `eth_getFilterChanges`
//!   - resolve each log's block timestamp (cached per sweep)
//!   - decode and publish through `EventBus::publish_async`
//!
//! A failing poll or decode is logged and the sweep moves on; no filter can
//! starve the others.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use chainevents_core::{
    event::unix_to_utc, ContractWatch, EventBus, EventSource, FilterId, LogDecoder, LogFilter,
    NodeClient, NodeError, RawLog, SubscriptionError, WatchedEvent,
};

use crate::backoff::Backoff;
use crate::config::ListenerConfig;
use crate::metrics::{ListenerMetrics, SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Running,
    Stopping,
}

/// A live node-side filter and the watch entry it was created for.
#[derive(Debug, Clone)]
pub struct ActiveFilter {
    pub id: FilterId,
    pub contract_name: String,
    pub address: Address,
    pub event: WatchedEvent,
    /// The filter as installed, reused on resubscription.
    pub params: LogFilter,
}

impl ActiveFilter {
    fn matches(&self, address: &Address, event_name: &str) -> bool {
        &self.address == address && self.event.name == event_name
    }
}

pub struct EventListener<C: NodeClient + ?Sized> {
    client: Arc<C>,
    decoder: LogDecoder,
    bus: Arc<EventBus>,
    config: ListenerConfig,
    watches: Mutex<Vec<ContractWatch>>,
    filters: Mutex<Vec<ActiveFilter>>,
    state: watch::Sender<ListenerState>,
    /// Set by `stop_listening`, cleared by `start_listening`.
    stopped: AtomicBool,
    metrics: Mutex<ListenerMetrics>,
}

impl<C: NodeClient + ?Sized> EventListener<C> {
    pub fn new(
        client: Arc<C>,
        bus: Arc<EventBus>,
        decoder: LogDecoder,
        watches: Vec<ContractWatch>,
        config: ListenerConfig,
    ) -> Self {
        info!(contracts = watches.len(), "event listener initialized");
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            client,
            decoder,
            bus,
            config,
            watches: Mutex::new(watches),
            filters: Mutex::new(Vec::new()),
            state,
            stopped: AtomicBool::new(false),
            metrics: Mutex::new(ListenerMetrics::default()),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn metrics(&self) -> ListenerMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn active_filters(&self) -> Vec<ActiveFilter> {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, f: impl FnOnce(&mut ListenerMetrics)) {
        f(&mut self.metrics.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn is_subscribed(&self, address: &Address, event_name: &str) -> bool {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|f| f.matches(address, event_name))
    }

    // ─── Subscription ────────────────────────────────────────────────────────

    async fn subscribe_pair(
        &self,
        watch: &ContractWatch,
        event: &WatchedEvent,
    ) -> Result<ActiveFilter, SubscriptionError> {
        let filter = watch.filter_for(event);
        let id = self
            .client
            .new_filter(&filter)
            .await
            .map_err(|source| SubscriptionError {
                contract: watch.name.clone(),
                event: event.name.clone(),
                source,
            })?;
        info!(contract = %watch.name, event = %event.name, filter = %id, "subscribed");
        Ok(ActiveFilter {
            id,
            contract_name: watch.name.clone(),
            address: watch.address,
            event: event.clone(),
            params: filter,
        })
    }

    /// Subscribe every enabled event of `watch` not already subscribed.
    /// Returns how many filters were created.
    async fn subscribe_watch(&self, watch: &ContractWatch) -> usize {
        let mut created = 0;
        for event in watch.enabled_events() {
            if self.is_subscribed(&watch.address, &event.name) {
                debug!(contract = %watch.name, event = %event.name, "already subscribed");
                continue;
            }
            match self.subscribe_pair(watch, event).await {
                Ok(active) => {
                    self.filters
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(active);
                    created += 1;
                }
                Err(e) => {
                    error!(error = %e, "subscription failed");
                    self.record(|m| m.subscription_errors += 1);
                }
            }
        }
        created
    }

    /// Create a filter for every enabled (contract, event) pair and enter
    /// `Running`. Pairs that fail to subscribe are skipped. Returns the number
    /// of active filters.
    pub async fn start_listening(&self) -> usize {
        if self.state() == ListenerState::Running {
            warn!("listener already running");
            return self.active_filters().len();
        }
        self.stopped.store(false, Ordering::SeqCst);
        let watches = self
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for watch in &watches {
            self.subscribe_watch(watch).await;
        }
        self.state.send_replace(ListenerState::Running);
        let active = self.active_filters().len();
        info!(filters = active, "started listening");
        active
    }

    /// Add a contract at runtime. If the listener is running its events are
    /// subscribed immediately; otherwise on the next `start_listening`.
    /// Returns the number of filters created now.
    pub async fn add_watch(&self, watch: ContractWatch) -> usize {
        {
            let mut watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
            match watches
                .iter_mut()
                .find(|w| w.address == watch.address && w.name == watch.name)
            {
                Some(existing) => {
                    for ev in &watch.events {
                        if !existing.events.iter().any(|e| e.name == ev.name) {
                            existing.events.push(ev.clone());
                        }
                    }
                }
                None => watches.push(watch.clone()),
            }
        }
        if self.state() != ListenerState::Running {
            return 0;
        }
        let created = self.subscribe_watch(&watch).await;
        info!(contract = %watch.name, created, "dynamic watch added");
        created
    }

    /// Release every filter and return to `Idle`. Teardown failures are
    /// logged. Safe to call repeatedly or before `start_listening`.
    pub async fn stop_listening(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let filters = std::mem::take(
            &mut *self.filters.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if self.state() == ListenerState::Idle && filters.is_empty() {
            return;
        }
        self.state.send_replace(ListenerState::Stopping);
        for f in &filters {
            match self.client.uninstall_filter(&f.id).await {
                Ok(_) => debug!(filter = %f.id, contract = %f.contract_name, "filter uninstalled"),
                Err(e) => warn!(filter = %f.id, error = %e, "failed to uninstall filter"),
            }
        }
        self.state.send_replace(ListenerState::Idle);
        info!(released = filters.len(), "stopped listening");
    }

    // ─── Polling ─────────────────────────────────────────────────────────────

    async fn resolve_timestamp(
        &self,
        log: &RawLog,
        cache: &mut HashMap<u64, DateTime<Utc>>,
    ) -> DateTime<Utc> {
        if let Some(ts) = log.timestamp {
            return unix_to_utc(ts);
        }
        if let Some(ts) = cache.get(&log.block_number) {
            return *ts;
        }
        match self.client.block(log.block_number, false).await {
            Ok(Some(block)) => {
                let ts = unix_to_utc(block.timestamp);
                cache.insert(log.block_number, ts);
                ts
            }
            Ok(None) => {
                warn!(block = log.block_number, "block not found, using local time");
                self.record(|m| m.timestamp_errors += 1);
                Utc::now()
            }
            Err(e) => {
                warn!(block = log.block_number, error = %e, "timestamp lookup failed, using local time");
                self.record(|m| m.timestamp_errors += 1);
                Utc::now()
            }
        }
    }

    async fn poll(&self, filter: &ActiveFilter) -> Result<Vec<RawLog>, NodeError> {
        match self.client.filter_changes(&filter.id).await {
            Err(NodeError::FilterNotFound(_)) if self.config.resubscribe_lost_filters => {
                warn!(filter = %filter.id, contract = %filter.contract_name, "filter lost, resubscribing");
                if self.state() != ListenerState::Running {
                    return Err(NodeError::FilterNotFound(filter.id.to_string()));
                }
                let new_id = self.client.new_filter(&filter.params).await?;
                let adopted = {
                    let mut filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
                    match filters.iter_mut().find(|f| f.id == filter.id) {
                        Some(f) => {
                            f.id = new_id.clone();
                            true
                        }
                        None => false,
                    }
                };
                if !adopted {
                    // Released while the new filter was being created.
                    debug!(filter = %new_id, "listener stopped during resubscription, releasing");
                    if let Err(e) = self.client.uninstall_filter(&new_id).await {
                        warn!(filter = %new_id, error = %e, "failed to uninstall filter");
                    }
                    return Err(NodeError::FilterNotFound(filter.id.to_string()));
                }
                self.record(|m| m.resubscriptions += 1);
                self.client.filter_changes(&new_id).await
            }
            other => other,
        }
    }

    /// Poll every active filter once. Stops early once the listener leaves
    /// `Running`.
    pub async fn sweep(&self) -> SweepReport {
        let filters = self.active_filters();
        let mut report = SweepReport::default();
        let mut timestamps = HashMap::new();

        for filter in &filters {
            if self.state() != ListenerState::Running {
                debug!(remaining = filters.len() - report.filters_polled, "sweep cut short by stop");
                break;
            }
            report.filters_polled += 1;
            let logs = match self.poll(filter).await {
                Ok(logs) => logs,
                Err(e) => {
                    report.filters_failed += 1;
                    warn!(
                        contract = %filter.contract_name,
                        event = %filter.event.name,
                        error = %e,
                        "filter poll failed"
                    );
                    continue;
                }
            };

            for log in logs {
                report.logs += 1;
                if log.is_removed() {
                    report.removed_skipped += 1;
                    debug!(tx = %log.transaction_hash, "skipping removed log");
                    continue;
                }
                let ts = self.resolve_timestamp(&log, &mut timestamps).await;
                let source = EventSource::new(&filter.contract_name, &filter.event.name);
                match self.decoder.decode(&log, source, ts) {
                    Ok(event) => {
                        debug!(
                            contract = %filter.contract_name,
                            event = %event.event_name(),
                            block = event.block_number(),
                            "publishing event"
                        );
                        let dispatch = self.bus.publish_async(event).await;
                        if dispatch.failed > 0 {
                            self.record(|m| m.handler_failures += dispatch.failed as u64);
                        }
                        report.published += 1;
                    }
                    Err(e) => {
                        report.decode_errors += 1;
                        warn!(
                            contract = %filter.contract_name,
                            tx = %log.transaction_hash,
                            error = %e,
                            "decode failed, skipping log"
                        );
                    }
                }
            }
        }

        self.record(|m| report.apply_to(m));
        report
    }

    /// Run sweeps until the listener leaves `Running`. Starts listening first
    /// unless `stop_listening` already ran. The inter-sweep pause is cut short
    /// by `stop_listening`.
    pub async fn run(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            info!("listener stopped before the loop started");
            return;
        }
        if self.state() != ListenerState::Running {
            self.start_listening().await;
        }
        let mut state_rx = self.state.subscribe();
        let mut backoff = Backoff::new(
            self.config.poll_interval(),
            self.config.error_backoff(),
            self.config.max_backoff(),
        );

        loop {
            if self.state() != ListenerState::Running {
                break;
            }
            let report = self.sweep().await;
            let delay = if report.all_failed() {
                let d = backoff.on_failure();
                error!(
                    failures = backoff.consecutive_failures(),
                    backoff_ms = d.as_millis() as u64,
                    "every filter poll failed"
                );
                d
            } else {
                backoff.on_success()
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = state_rx.wait_for(|s| *s != ListenerState::Running) => break,
            }
        }
        info!("listener loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256, Bytes, B256};
    use async_trait::async_trait;
    use chainevents_core::BlockData;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FlakyNode {
        new_filters: AtomicUsize,
        uninstalls: AtomicUsize,
        block_calls: AtomicUsize,
        fail_subscribe_for: Option<B256>,
        pending: Mutex<HashMap<String, Vec<RawLog>>>,
        lost: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeClient for FlakyNode {
        async fn latest_block_number(&self) -> Result<u64, NodeError> {
            Ok(100)
        }
        async fn block(&self, number: u64, _: bool) -> Result<Option<BlockData>, NodeError> {
            self.block_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(BlockData {
                number,
                hash: B256::ZERO,
                parent_hash: B256::ZERO,
                timestamp: 1_700_000_000,
                gas_used: 0,
                gas_limit: 0,
                transactions: vec![],
                size: None,
                miner: None,
            }))
        }
        async fn logs(&self, _: &LogFilter) -> Result<Vec<RawLog>, NodeError> {
            Ok(vec![])
        }
        async fn new_filter(&self, filter: &LogFilter) -> Result<FilterId, NodeError> {
            if filter.signature() == self.fail_subscribe_for.as_ref() {
                return Err(NodeError::Rpc {
                    code: -32000,
                    message: "rejected".into(),
                });
            }
            let n = self.new_filters.fetch_add(1, Ordering::SeqCst);
            Ok(FilterId::new(format!("0x{n}")))
        }
        async fn filter_changes(&self, id: &FilterId) -> Result<Vec<RawLog>, NodeError> {
            let mut lost = self.lost.lock().unwrap();
            if let Some(pos) = lost.iter().position(|l| l == id.as_str()) {
                lost.remove(pos);
                return Err(NodeError::FilterNotFound(id.to_string()));
            }
            Ok(self
                .pending
                .lock()
                .unwrap()
                .remove(id.as_str())
                .unwrap_or_default())
        }
        async fn uninstall_filter(&self, _: &FilterId) -> Result<bool, NodeError> {
            self.uninstalls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    const SIG_A: B256 = b256!("00000000000000000000000000000000000000000000000000000000000000aa");
    const SIG_B: B256 = b256!("00000000000000000000000000000000000000000000000000000000000000bb");

    fn watch(events: &[(&str, B256)]) -> ContractWatch {
        ContractWatch {
            name: "Token".into(),
            address: address!("1111111111111111111111111111111111111111"),
            events: events
                .iter()
                .map(|(n, s)| WatchedEvent {
                    name: n.to_string(),
                    signature: *s,
                    topics: vec![],
                    enabled: true,
                })
                .collect(),
            block_range: None,
        }
    }

    fn raw(sig: B256, block: u64) -> RawLog {
        RawLog {
            address: address!("1111111111111111111111111111111111111111"),
            topics: vec![sig],
            data: Bytes::new(),
            block_number: block,
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

    fn listener(node: Arc<FlakyNode>, watches: Vec<ContractWatch>) -> EventListener<FlakyNode> {
        EventListener::new(
            node,
            Arc::new(EventBus::new()),
            LogDecoder::default(),
            watches,
            ListenerConfig::default(),
        )
    }

    #[tokio::test]
    async fn partial_subscription_is_not_fatal() {
        let node = Arc::new(FlakyNode {
            fail_subscribe_for: Some(SIG_B),
            ..Default::default()
        });
        let l = listener(Arc::clone(&node), vec![watch(&[("A", SIG_A), ("B", SIG_B)])]);
        assert_eq!(l.start_listening().await, 1);
        assert_eq!(l.state(), ListenerState::Running);
        assert_eq!(l.metrics().subscription_errors, 1);
    }

    #[tokio::test]
    async fn timestamps_cached_per_block() {
        let node = Arc::new(FlakyNode::default());
        let l = listener(Arc::clone(&node), vec![watch(&[("A", SIG_A)])]);
        l.start_listening().await;
        node.pending
            .lock()
            .unwrap()
            .insert("0x0".into(), vec![raw(SIG_A, 5), raw(SIG_A, 5), raw(SIG_A, 6)]);

        let report = l.sweep().await;
        assert_eq!(report.published, 3);
        assert_eq!(node.block_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn add_watch_skips_existing_pairs() {
        let node = Arc::new(FlakyNode::default());
        let l = listener(Arc::clone(&node), vec![watch(&[("A", SIG_A)])]);
        assert_eq!(l.add_watch(watch(&[("B", SIG_B)])).await, 0);
        assert_eq!(l.start_listening().await, 2);
        assert_eq!(l.add_watch(watch(&[("A", SIG_A), ("B", SIG_B)])).await, 0);
        assert_eq!(l.active_filters().len(), 2);
    }

    #[tokio::test]
    async fn lost_filter_is_recreated() {
        let node = Arc::new(FlakyNode::default());
        let l = listener(Arc::clone(&node), vec![watch(&[("A", SIG_A)])]);
        l.start_listening().await;
        node.lost.lock().unwrap().push("0x0".into());
        node.pending
            .lock()
            .unwrap()
            .insert("0x1".into(), vec![raw(SIG_A, 9)]);

        let report = l.sweep().await;
        assert_eq!(report.filters_failed, 0);
        assert_eq!(report.published, 1);
        assert_eq!(l.active_filters()[0].id, FilterId::new("0x1"));
        assert_eq!(l.metrics().resubscriptions, 1);
    }

    #[tokio::test]
    async fn run_exits_promptly_on_stop() {
        let node = Arc::new(FlakyNode::default());
        let l = Arc::new(listener(Arc::clone(&node), vec![watch(&[("A", SIG_A)])]));
        let runner = {
            let l = Arc::clone(&l);
            tokio::spawn(async move { l.run().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        l.stop_listening().await;
        tokio::time::timeout(std::time::Duration::from_secs(2), runner)
            .await
            .expect("loop did not exit")
            .unwrap();
        assert_eq!(l.state(), ListenerState::Idle);
        assert!(l.metrics().sweeps >= 1);
        assert_eq!(node.uninstalls.load(Ordering::SeqCst), 1);
    }
    /// Tracks which filters are installed node-side; the first poll blocks
    /// until released.
    #[derive(Default)]
    struct GatedNode {
        next: AtomicUsize,
        installed: Mutex<std::collections::HashSet<String>>,
        gate_used: AtomicBool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl NodeClient for GatedNode {
        async fn latest_block_number(&self) -> Result<u64, NodeError> {
            Ok(100)
        }
        async fn block(&self, _: u64, _: bool) -> Result<Option<BlockData>, NodeError> {
            Ok(None)
        }
        async fn logs(&self, _: &LogFilter) -> Result<Vec<RawLog>, NodeError> {
            Ok(vec![])
        }
        async fn new_filter(&self, _: &LogFilter) -> Result<FilterId, NodeError> {
            let id = format!("f{}", self.next.fetch_add(1, Ordering::SeqCst));
            self.installed.lock().unwrap().insert(id.clone());
            Ok(FilterId::new(id))
        }
        async fn filter_changes(&self, id: &FilterId) -> Result<Vec<RawLog>, NodeError> {
            if !self.gate_used.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            if self.installed.lock().unwrap().contains(id.as_str()) {
                Ok(vec![])
            } else {
                Err(NodeError::FilterNotFound(id.to_string()))
            }
        }
        async fn uninstall_filter(&self, id: &FilterId) -> Result<bool, NodeError> {
            Ok(self.installed.lock().unwrap().remove(id.as_str()))
        }
    }

    #[tokio::test]
    async fn stop_during_sweep_leaves_no_filters_installed() {
        let node = Arc::new(GatedNode::default());
        let l = Arc::new(EventListener::new(
            Arc::clone(&node),
            Arc::new(EventBus::new()),
            LogDecoder::default(),
            vec![watch(&[("A", SIG_A), ("B", SIG_B), ("C", B256::repeat_byte(0xcc))])],
            ListenerConfig::default(),
        ));
        assert_eq!(l.start_listening().await, 3);

        let sweeping = {
            let l = Arc::clone(&l);
            tokio::spawn(async move { l.sweep().await })
        };
        node.entered.notified().await;
        l.stop_listening().await;
        node.release.notify_one();
        let report = sweeping.await.unwrap();

        assert_eq!(report.filters_polled, 1);
        assert_eq!(l.state(), ListenerState::Idle);
        assert!(l.active_filters().is_empty());
        assert!(node.installed.lock().unwrap().is_empty());
        assert_eq!(l.metrics().resubscriptions, 0);
    }

    #[tokio::test]
    async fn run_does_not_restart_after_stop() {
        let node = Arc::new(FlakyNode::default());
        let l = listener(Arc::clone(&node), vec![watch(&[("A", SIG_A)])]);
        l.start_listening().await;
        l.stop_listening().await;

        tokio::time::timeout(std::time::Duration::from_secs(1), l.run())
            .await
            .expect("run should return immediately");
        assert_eq!(l.state(), ListenerState::Idle);
        assert_eq!(node.new_filters.load(Ordering::SeqCst), 1);

        // An explicit start is still allowed.
        assert_eq!(l.start_listening().await, 1);
        assert_eq!(l.state(), ListenerState::Running);
    }
}
