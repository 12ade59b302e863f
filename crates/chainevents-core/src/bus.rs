//! `EventBus`: typed publish/subscribe router keyed by [`EventKind`].
//!
//! Subscribers describe their handlers in a [`HandlerTable`] built at
//! construction time (`bind` for synchronous handlers, `bind_async` for
//! handlers that suspend). The bus never holds its registry lock while a
//! handler runs: each publish takes a snapshot of the matching handlers, so
//! `register` / `unregister` may run concurrently with dispatch.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{BusError, HandlerError};
use crate::event::{ChainEvent, EventKind};

pub type SyncHandler = Arc<dyn Fn(&ChainEvent) -> Result<(), HandlerError> + Send + Sync>;
pub type AsyncHandler =
    Arc<dyn Fn(Arc<ChainEvent>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Opaque handle returned by [`EventBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

// ─── HandlerTable ────────────────────────────────────────────────────────────

/// Explicit registration table for one subscriber.
pub struct HandlerTable {
    subscriber: String,
    sync: Vec<(EventKind, String, SyncHandler)>,
    concurrent: Vec<(EventKind, String, AsyncHandler)>,
}

impl HandlerTable {
    pub fn new(subscriber: impl Into<String>) -> Self {
        Self {
            subscriber: subscriber.into(),
            sync: Vec::new(),
            concurrent: Vec::new(),
        }
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    fn contains(&self, kind: EventKind, name: &str) -> bool {
        self.sync.iter().any(|(k, n, _)| *k == kind && n == name)
            || self.concurrent.iter().any(|(k, n, _)| *k == kind && n == name)
    }

    /// Bind a synchronous handler. A second binding with the same
    /// `(kind, name)` is ignored.
    pub fn bind<F>(mut self, kind: EventKind, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ChainEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.contains(kind, &name) {
            warn!(subscriber = %self.subscriber, handler = %name, %kind, "duplicate binding ignored");
            return self;
        }
        self.sync.push((kind, name, Arc::new(handler)));
        self
    }

    /// Bind a handler that is scheduled as its own task on `publish_async`.
    pub fn bind_async<F, Fut>(mut self, kind: EventKind, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<ChainEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let name = name.into();
        if self.contains(kind, &name) {
            warn!(subscriber = %self.subscriber, handler = %name, %kind, "duplicate binding ignored");
            return self;
        }
        let handler: AsyncHandler = Arc::new(move |ev| Box::pin(handler(ev)));
        self.concurrent.push((kind, name, handler));
        self
    }

    pub fn len(&self) -> usize {
        self.sync.len() + self.concurrent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A component that can describe its own handlers.
pub trait Subscriber: Send + Sync + 'static {
    fn handler_table(self: Arc<Self>) -> HandlerTable;
}

// ─── EventBus ────────────────────────────────────────────────────────────────

struct Binding<H> {
    subscriber: SubscriberId,
    label: Arc<str>,
    handler: H,
}

impl<H: Clone> Clone for Binding<H> {
    fn clone(&self) -> Self {
        Self {
            subscriber: self.subscriber,
            label: Arc::clone(&self.label),
            handler: self.handler.clone(),
        }
    }
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriberId, String>,
    sync: HashMap<EventKind, Vec<Binding<SyncHandler>>>,
    concurrent: HashMap<EventKind, Vec<Binding<AsyncHandler>>>,
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sync_invoked: usize,
    pub async_invoked: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn invoked(&self) -> usize {
        self.sync_invoked + self.async_invoked
    }
}

#[derive(Default)]
pub struct EventBus {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every binding of `table`. Fails if a subscriber with the same
    /// name is still registered.
    pub fn register(&self, table: HandlerTable) -> Result<SubscriberId, BusError> {
        let mut reg = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if reg.subscribers.values().any(|n| *n == table.subscriber) {
            return Err(BusError::AlreadyRegistered(table.subscriber));
        }
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = table.len();

        for (kind, name, handler) in table.sync {
            reg.sync.entry(kind).or_default().push(Binding {
                subscriber: id,
                label: format!("{}::{}", table.subscriber, name).into(),
                handler,
            });
        }
        for (kind, name, handler) in table.concurrent {
            reg.concurrent.entry(kind).or_default().push(Binding {
                subscriber: id,
                label: format!("{}::{}", table.subscriber, name).into(),
                handler,
            });
        }
        debug!(subscriber = %table.subscriber, handlers = count, "subscriber registered");
        reg.subscribers.insert(id, table.subscriber);
        Ok(id)
    }

    /// Register a [`Subscriber`] through its own handler table.
    pub fn subscribe<S: Subscriber>(&self, subscriber: Arc<S>) -> Result<SubscriberId, BusError> {
        self.register(subscriber.handler_table())
    }

    /// Remove all of a subscriber's handlers. Returns `false` if it was not
    /// registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut reg = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let Some(name) = reg.subscribers.remove(&id) else {
            return false;
        };
        for list in reg.sync.values_mut() {
            list.retain(|b| b.subscriber != id);
        }
        for list in reg.concurrent.values_mut() {
            list.retain(|b| b.subscriber != id);
        }
        debug!(subscriber = %name, "subscriber unregistered");
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    /// Number of handlers bound to `kind` across both groups.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        let reg = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        reg.sync.get(&kind).map_or(0, Vec::len) + reg.concurrent.get(&kind).map_or(0, Vec::len)
    }

    fn sync_snapshot(&self, kind: EventKind) -> Vec<Binding<SyncHandler>> {
        let reg = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        reg.sync.get(&kind).cloned().unwrap_or_default()
    }

    fn concurrent_snapshot(&self, kind: EventKind) -> Vec<Binding<AsyncHandler>> {
        let reg = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        reg.concurrent.get(&kind).cloned().unwrap_or_default()
    }

    /// Invoke the synchronous handlers for `event`'s kind, in registration
    /// order. A failing handler is logged and does not stop the rest.
    pub fn publish(&self, event: &ChainEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        for binding in self.sync_snapshot(event.kind()) {
            report.sync_invoked += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| (binding.handler)(event)))
                .unwrap_or_else(|_| {
                    Err(HandlerError::Panicked {
                        handler: binding.label.to_string(),
                    })
                });
            if let Err(e) = outcome {
                report.failed += 1;
                warn!(handler = %binding.label, kind = %event.kind(), error = %e, "handler failed");
            }
        }
        report
    }

    /// Run the synchronous group, then spawn every concurrent handler as an
    /// independent task and wait for all of them. One task failing or
    /// panicking does not cancel the others.
    pub async fn publish_async(&self, event: impl Into<Arc<ChainEvent>>) -> DispatchReport {
        let event: Arc<ChainEvent> = event.into();
        let mut report = self.publish(&event);

        let handlers = self.concurrent_snapshot(event.kind());
        if handlers.is_empty() {
            return report;
        }

        let mut tasks = JoinSet::new();
        for binding in handlers {
            report.async_invoked += 1;
            let label = binding.label;
            let made = catch_unwind(AssertUnwindSafe(|| (binding.handler)(Arc::clone(&event))));
            match made {
                Ok(fut) => {
                    tasks.spawn(async move { (label, fut.await) });
                }
                Err(_) => {
                    report.failed += 1;
                    let e = HandlerError::Panicked {
                        handler: label.to_string(),
                    };
                    warn!(handler = %label, kind = %event.kind(), error = %e, "async handler failed");
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((label, Err(e))) => {
                    report.failed += 1;
                    warn!(handler = %label, kind = %event.kind(), error = %e, "async handler failed");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(kind = %event.kind(), error = %e, "async handler task aborted");
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{unix_to_utc, EthereumEvent};
    use crate::types::RawLog;
    use alloy_primitives::{Address, Bytes, B256};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    fn generic() -> ChainEvent {
        let log = RawLog {
            address: Address::ZERO,
            topics: vec![B256::ZERO],
            data: Bytes::new(),
            block_number: 1,
            block_hash: None,
            transaction_hash: B256::ZERO,
            log_index: 0,
            timestamp: None,
            removed: None,
            contract_name: None,
            event_name: None,
            event_signature: None,
        };
        ChainEvent::Generic(EthereumEvent::from_log(&log, "Test", unix_to_utc(0)))
    }

    fn counting(count: &Arc<AtomicUsize>) -> impl Fn(&ChainEvent) -> Result<(), HandlerError> {
        let count = Arc::clone(count);
        move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn fan_out_three_sync_two_async() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let mut table = HandlerTable::new("counter");
        for i in 0..3 {
            table = table.bind(EventKind::Generic, format!("sync{i}"), counting(&count));
        }
        for i in 0..2 {
            let c = Arc::clone(&count);
            table = table.bind_async(EventKind::Generic, format!("async{i}"), move |_| {
                let c = Arc::clone(&c);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        bus.register(table).unwrap();

        let report = bus.publish_async(generic()).await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(report.invoked(), 5);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn failing_sync_handler_is_isolated() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o1, o2) = (Arc::clone(&order), Arc::clone(&order));
        let table = HandlerTable::new("flaky")
            .bind(EventKind::Generic, "boom", |_| Err(HandlerError::failed("boom", "nope")))
            .bind(EventKind::Generic, "panics", |_| panic!("handler bug"))
            .bind(EventKind::Generic, "after", move |_| {
                o1.lock().unwrap().push("after");
                Ok(())
            })
            .bind(EventKind::Block, "other_kind", move |_| {
                o2.lock().unwrap().push("block");
                Ok(())
            });
        bus.register(table).unwrap();

        let r1 = bus.publish(&generic());
        let r2 = bus.publish(&generic());
        assert_eq!(r1.failed, 2);
        assert_eq!(r2.sync_invoked, 3);
        assert_eq!(*order.lock().unwrap(), vec!["after", "after"]);
    }

    #[tokio::test]
    async fn failing_async_handler_does_not_cancel_siblings() {
        let bus = EventBus::new();
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        let table = HandlerTable::new("mixed")
            .bind_async(EventKind::Generic, "fails", |_| async {
                Err(HandlerError::failed("fails", "down"))
            })
            .bind_async(EventKind::Generic, "slow", move |_| {
                let d = Arc::clone(&d);
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    d.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        bus.register(table).unwrap();

        let report = bus.publish_async(generic()).await;
        assert_eq!(report.async_invoked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_async_factory_is_isolated() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let table = HandlerTable::new("factory")
            .bind_async(
                EventKind::Generic,
                "broken",
                |_: Arc<ChainEvent>| -> futures::future::Ready<Result<(), HandlerError>> {
                    panic!("handler bug before the first await")
                },
            )
            .bind_async(EventKind::Generic, "counts", move |_| {
                let r = Arc::clone(&r);
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        bus.register(table).unwrap();

        let report = bus.publish_async(generic()).await;
        assert_eq!(report.async_invoked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // The bus stays usable afterwards.
        bus.publish_async(generic()).await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(&generic()), DispatchReport::default());
    }

    #[test]
    fn duplicate_registration_rejected_until_unregistered() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let make = || HandlerTable::new("svc").bind(EventKind::Generic, "h", counting(&count));

        let id = bus.register(make()).unwrap();
        assert_eq!(
            bus.register(make()).unwrap_err(),
            BusError::AlreadyRegistered("svc".into())
        );
        assert!(bus.unregister(id));
        assert!(!bus.unregister(id));
        assert_eq!(bus.handler_count(EventKind::Generic), 0);

        bus.register(make()).unwrap();
        bus.publish(&generic());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_binding_in_table_ignored() {
        let count = Arc::new(AtomicUsize::new(0));
        let table = HandlerTable::new("svc")
            .bind(EventKind::Generic, "h", counting(&count))
            .bind(EventKind::Generic, "h", counting(&count))
            .bind(EventKind::Block, "h", counting(&count));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn register_during_dispatch_does_not_deadlock() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        let table = HandlerTable::new("registrar").bind(EventKind::Generic, "add", move |_| {
            let _ = inner.register(HandlerTable::new("late").bind(
                EventKind::Generic,
                "noop",
                |_| Ok(()),
            ));
            Ok(())
        });
        bus.register(table).unwrap();

        // The late subscriber is not part of the in-flight snapshot.
        assert_eq!(bus.publish(&generic()).sync_invoked, 1);
        assert_eq!(bus.publish(&generic()).sync_invoked, 2);
    }
}
