//! `BlockListener`: publishes a `BlockEvent` for every new block.
//!
//! Independent of the log filters: it shares the bus, not the filter set,
//! and is only started when a realtime block source is configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use chainevents_core::{BlockEvent, ChainEvent, EventBus, NodeClient, NodeError};

use crate::backoff::Backoff;
use crate::config::BlockListenerConfig;

pub struct BlockListener<C: NodeClient + ?Sized> {
    client: Arc<C>,
    bus: Arc<EventBus>,
    config: BlockListenerConfig,
    last_seen: Mutex<Option<u64>>,
    running: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl<C: NodeClient + ?Sized> BlockListener<C> {
    pub fn new(client: Arc<C>, bus: Arc<EventBus>, config: BlockListenerConfig) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            client,
            bus,
            config,
            last_seen: Mutex::new(None),
            running,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn last_seen(&self) -> Option<u64> {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Publish every block after the last one seen, up to
    /// `max_blocks_per_sweep`. Returns how many blocks were published.
    pub async fn poll_once(&self) -> Result<usize, NodeError> {
        let head = self.client.latest_block_number().await?;
        let next = match self.last_seen() {
            Some(n) => n + 1,
            None => self.config.start_block.unwrap_or(head),
        };
        if next > head {
            return Ok(0);
        }
        let end = head.min(next.saturating_add(self.config.max_blocks_per_sweep.max(1) - 1));

        let mut published = 0;
        for number in next..=end {
            let Some(block) = self.client.block(number, false).await? else {
                debug!(block = number, "block not yet available");
                break;
            };
            let event = ChainEvent::Block(BlockEvent::from(&block));
            self.bus.publish_async(event).await;
            *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Some(number);
            published += 1;
        }
        if end < head {
            debug!(behind = head - end, "block listener catching up");
        }
        Ok(published)
    }

    /// Poll until [`stop`](Self::stop) is called. Returns at once if `stop`
    /// already ran.
    pub async fn run(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            info!("block listener stopped before the loop started");
            return;
        }
        self.running.send_replace(true);
        let mut rx = self.running.subscribe();
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.polling_interval_ms),
            Duration::from_millis(self.config.error_backoff_ms),
            Duration::from_millis(self.config.max_backoff_ms),
        );
        info!(
            interval_ms = self.config.polling_interval_ms,
            start_block = ?self.config.start_block,
            "block listener started"
        );

        while self.is_running() {
            let delay = match self.poll_once().await {
                Ok(_) => backoff.on_success(),
                Err(e) => {
                    let d = backoff.on_failure();
                    warn!(error = %e, backoff_ms = d.as_millis() as u64, "block poll failed");
                    d
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = rx.wait_for(|running| !running) => break,
            }
        }
        info!("block listener stopped");
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.running.send_replace(false);
    }
}
