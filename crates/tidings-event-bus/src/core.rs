//! Core Event Bus Implementation
//!
//! Named-event publish/subscribe with deferred delivery:
//! - Subscribers are kept per event name, in subscription order
//! - `emit` snapshots the subscribers and queues one delivery for the [`Dispatcher`]
//! - Removal is by handler identity, or through the [`Unsubscribe`] handle
//! - Live per-event subscriber counts and cumulative metrics

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak,
    atomic::{AtomicUsize, Ordering},
};

use tidings_types::BusConfig;
use tokio::sync::mpsc;

use crate::dispatcher::{Delivery, DeliveryFailure, Dispatcher};

/// Types usable as event names.
pub trait EventName: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> EventName for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Subscriber callback. Its `Arc` identity is what `unsubscribe` matches on.
pub type Handler<P> = Arc<dyn Fn(&P) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a fallible closure into a [`Handler`]
pub fn handler<P, F>(callback: F) -> Handler<P>
where
    F: Fn(&P) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cumulative counters plus the live subscription count
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBusMetrics {
    /// Emits that scheduled a delivery
    pub events_emitted: usize,
    /// Emits dropped because nobody was subscribed
    pub events_skipped: usize,
    /// Emits dropped because the dispatcher was gone
    pub events_lost: usize,
    /// Handler invocations performed by the dispatcher
    pub deliveries: usize,
    /// Handler invocations that returned an error or panicked
    pub failures: usize,
    /// Current number of registered handlers, across all events
    pub active_subscriptions: usize,
    /// Total number of subscriptions created
    pub total_subscriptions: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) events_emitted: AtomicUsize,
    pub(crate) events_skipped: AtomicUsize,
    pub(crate) events_lost: AtomicUsize,
    pub(crate) deliveries: AtomicUsize,
    pub(crate) failures: AtomicUsize,
    pub(crate) total_subscriptions: AtomicUsize,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Registry<K, P> {
    subscribers: HashMap<K, Vec<Handler<P>>>,
}

impl<K: EventName, P> Registry<K, P> {
    fn add(&mut self, event: K, handler: Handler<P>) {
        self.subscribers.entry(event).or_default().push(handler);
    }

    /// Removes the first handler under `event` with the same identity.
    /// Empty sequences are dropped so an unused name is absent from the map.
    fn remove(&mut self, event: &K, handler: &Handler<P>) -> bool {
        let Some(handlers) = self.subscribers.get_mut(event) else {
            return false;
        };
        let Some(pos) = handlers.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return false;
        };
        handlers.remove(pos);
        if handlers.is_empty() {
            self.subscribers.remove(event);
        }
        true
    }

    fn snapshot(&self, event: &K) -> Option<Vec<Handler<P>>> {
        self.subscribers
            .get(event)
            .filter(|handlers| !handlers.is_empty())
            .cloned()
    }

    fn count(&self, event: &K) -> usize {
        self.subscribers.get(event).map_or(0, Vec::len)
    }

    fn total(&self) -> usize {
        self.subscribers.values().map(Vec::len).sum()
    }
}

/// State shared by every bus clone, the dispatcher and the unsubscribe handles
pub(crate) struct Shared<K, P> {
    registry: Mutex<Registry<K, P>>,
    pub(crate) counters: Counters,
    failures: Mutex<VecDeque<DeliveryFailure>>,
}

impl<K: EventName, P> Shared<K, P> {
    fn remove(&self, event: &K, handler: &Handler<P>) -> bool {
        let removed = lock(&self.registry).remove(event, handler);
        if removed {
            log::trace!("[EventBus] Unsubscribed from {:?}", event);
        }
        removed
    }

    pub(crate) fn record_failure(&self, failure: DeliveryFailure, capacity: usize) {
        if capacity == 0 {
            return;
        }
        let mut failures = lock(&self.failures);
        while failures.len() >= capacity {
            failures.pop_front();
        }
        failures.push_back(failure);
    }

    pub(crate) fn metrics(&self) -> EventBusMetrics {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        EventBusMetrics {
            events_emitted: load(&self.counters.events_emitted),
            events_skipped: load(&self.counters.events_skipped),
            events_lost: load(&self.counters.events_lost),
            deliveries: load(&self.counters.deliveries),
            failures: load(&self.counters.failures),
            active_subscriptions: lock(&self.registry).total(),
            total_subscriptions: load(&self.counters.total_subscriptions),
        }
    }
}

/// Handle returned by every subscribe call.
///
/// `unsubscribe` removes the subscription it was created for, at most once;
/// clones share that state. Dropping the handle does not unsubscribe.
#[derive(Clone)]
pub struct Unsubscribe {
    action: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Unsubscribe {
    fn new(action: impl FnOnce() + Send + 'static) -> Self {
        let action: Box<dyn FnOnce() + Send> = Box::new(action);
        Self {
            action: Arc::new(Mutex::new(Some(action))),
        }
    }

    pub fn unsubscribe(&self) {
        let action = lock(&self.action).take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether `unsubscribe` has not been called yet
    pub fn is_pending(&self) -> bool {
        lock(&self.action).is_some()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// In-process event bus keyed by event name `K`, carrying payloads of type `P`.
///
/// Clones share subscribers, metrics and the delivery queue. Deliveries only
/// happen when the paired [`Dispatcher`] runs.
pub struct EventBus<K, P> {
    shared: Arc<Shared<K, P>>,
    queue: mpsc::UnboundedSender<Delivery<K, P>>,
}

impl<K, P> Clone for EventBus<K, P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<K, P> EventBus<K, P>
where
    K: EventName,
    P: Send + 'static,
{
    /// Create an empty bus and the dispatcher that delivers its events
    pub fn new() -> (Self, Dispatcher<K, P>) {
        Self::with_config(&BusConfig::default())
    }

    pub fn with_config(config: &BusConfig) -> (Self, Dispatcher<K, P>) {
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry {
                subscribers: HashMap::new(),
            }),
            counters: Counters::default(),
            failures: Mutex::new(VecDeque::new()),
        });
        let (queue, receiver) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(receiver, shared.clone(), config);
        (Self { shared, queue }, dispatcher)
    }

    /// Append `handler` to the subscribers of `event`
    pub fn subscribe(&self, event: K, handler: Handler<P>) -> Unsubscribe {
        log::trace!("[EventBus] New subscription to {:?}", event);
        lock(&self.shared.registry).add(event.clone(), handler.clone());
        Counters::bump(&self.shared.counters.total_subscriptions);

        let shared = Arc::downgrade(&self.shared);
        let handler = Arc::downgrade(&handler);
        Unsubscribe::new(move || remove_weak(&shared, &event, &handler))
    }

    /// Subscribe an infallible closure
    pub fn subscribe_fn<F>(&self, event: K, callback: F) -> Unsubscribe
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.subscribe(
            event,
            handler(move |payload: &P| {
                callback(payload);
                Ok(())
            }),
        )
    }

    /// Subscribe to a single delivery of `event`.
    ///
    /// The callback runs at most once, even when several emits were queued
    /// before the first delivery; the subscription then removes itself.
    pub fn subscribe_once<F>(&self, event: K, callback: F) -> Unsubscribe
    where
        F: FnOnce(&P) + Send + 'static,
    {
        let pending = Arc::new(Mutex::new(Some(callback)));
        let this_subscription: Arc<OnceLock<Unsubscribe>> = Arc::new(OnceLock::new());
        let (callback, slot) = (pending.clone(), this_subscription.clone());

        let unsubscribe = self.subscribe_fn(event, move |payload| {
            let callback = lock(&callback).take();
            if let Some(callback) = callback {
                if let Some(unsubscribe) = slot.get() {
                    unsubscribe.unsubscribe();
                }
                callback(payload);
            }
        });
        let _ = this_subscription.set(unsubscribe.clone());
        // A dispatcher on another thread may have fired it before the slot was set.
        if lock(&pending).is_none() {
            unsubscribe.unsubscribe();
        }
        unsubscribe
    }

    /// Remove the first subscription of `handler` under `event`.
    ///
    /// Unknown events and handlers are ignored.
    pub fn unsubscribe(&self, event: &K, handler: &Handler<P>) {
        self.shared.remove(event, handler);
    }

    /// Queue one delivery of `payload` to the current subscribers of `event`.
    ///
    /// Returns `false` without scheduling anything when there are no subscribers.
    pub fn emit(&self, event: K, payload: P) -> bool {
        let snapshot = lock(&self.shared.registry).snapshot(&event);
        let Some(handlers) = snapshot else {
            Counters::bump(&self.shared.counters.events_skipped);
            log::trace!("[EventBus] No subscribers for {:?}", event);
            return false;
        };

        let delivery = Delivery {
            event,
            payload,
            handlers,
        };
        match self.queue.send(delivery) {
            Ok(()) => {
                Counters::bump(&self.shared.counters.events_emitted);
                true
            }
            Err(mpsc::error::SendError(delivery)) => {
                Counters::bump(&self.shared.counters.events_lost);
                log::warn!(
                    "[EventBus] Dispatcher is gone, dropping {:?} for {} subscribers",
                    delivery.event,
                    delivery.handlers.len()
                );
                false
            }
        }
    }

    /// Drop every subscription of every event
    pub fn remove_all_listeners(&self) {
        let mut registry = lock(&self.shared.registry);
        let count = registry.total();
        registry.subscribers.clear();
        log::info!("[EventBus] Cleared {} subscriptions", count);
    }

    /// Subscriber count per event name; names without subscribers are omitted
    pub fn stats(&self) -> HashMap<K, usize> {
        lock(&self.shared.registry)
            .subscribers
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(event, handlers)| (event.clone(), handlers.len()))
            .collect()
    }

    /// Number of live subscribers under `event`
    pub fn subscriber_count(&self, event: &K) -> usize {
        lock(&self.shared.registry).count(event)
    }

    /// Whether `event` has at least one subscriber
    pub fn has_subscribers(&self, event: &K) -> bool {
        self.subscriber_count(event) > 0
    }

    /// Snapshot of the cumulative counters and live subscription count
    pub fn metrics(&self) -> EventBusMetrics {
        self.shared.metrics()
    }

    /// Failures kept under the `collect` failure policy, oldest first
    pub fn failures(&self) -> Vec<DeliveryFailure> {
        lock(&self.shared.failures).iter().cloned().collect()
    }

    /// Drain the collected failures, oldest first
    pub fn take_failures(&self) -> Vec<DeliveryFailure> {
        lock(&self.shared.failures).drain(..).collect()
    }
}

fn remove_weak<K: EventName, P>(
    shared: &Weak<Shared<K, P>>,
    event: &K,
    handler: &Weak<dyn Fn(&P) -> anyhow::Result<()> + Send + Sync>,
) {
    // A dead handler has already left every subscriber list.
    if let (Some(shared), Some(handler)) = (shared.upgrade(), handler.upgrade()) {
        shared.remove(event, &handler);
    }
}
