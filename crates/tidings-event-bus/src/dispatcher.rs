//! Deferred delivery of emitted events.
//!
//! `EventBus::emit` only queues a [`Delivery`]; the [`Dispatcher`] runs it
//! later, either drained in place with [`Dispatcher::run_pending`] or as a
//! tokio task via [`Dispatcher::run`] / [`Dispatcher::spawn`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tidings_types::{BusConfig, FailurePolicy};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::{Counters, EventBusMetrics, EventName, Handler, Shared};

/// One emit: the payload and the subscribers captured when it was emitted
pub(crate) struct Delivery<K, P> {
    pub(crate) event: K,
    pub(crate) payload: P,
    pub(crate) handlers: Vec<Handler<P>>,
}

/// A subscriber that returned an error or panicked during delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Debug rendering of the event name
    pub event: String,
    /// Index of the subscriber within the delivered snapshot
    pub position: usize,
    pub message: String,
    pub panicked: bool,
    pub at: DateTime<Utc>,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.panicked { "panicked" } else { "failed" };
        write!(
            f,
            "subscriber #{} of {} {}: {}",
            self.position, self.event, kind, self.message
        )
    }
}

/// Observer called for every delivery failure, whatever the policy
pub type FailureHook = Arc<dyn Fn(&DeliveryFailure) + Send + Sync>;

pub struct Dispatcher<K, P> {
    receiver: mpsc::UnboundedReceiver<Delivery<K, P>>,
    shared: Arc<Shared<K, P>>,
    policy: FailurePolicy,
    max_failures: usize,
    hook: Option<FailureHook>,
}

impl<K, P> Dispatcher<K, P>
where
    K: EventName,
    P: Send + 'static,
{
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<Delivery<K, P>>,
        shared: Arc<Shared<K, P>>,
        config: &BusConfig,
    ) -> Self {
        Self {
            receiver,
            shared,
            policy: config.failure_policy,
            max_failures: config.max_collected_failures,
            hook: None,
        }
    }

    pub fn with_failure_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DeliveryFailure) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Deliver everything queued so far, without waiting.
    ///
    /// Emits made by subscribers while draining are delivered in the same
    /// call. Returns the number of emits delivered.
    pub fn run_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(delivery) = self.receiver.try_recv() {
            self.deliver(delivery);
            delivered += 1;
        }
        delivered
    }

    /// Deliver emits as they arrive until every bus handle has been dropped
    /// and the queue is empty. Returns the final metrics.
    pub async fn run(mut self) -> EventBusMetrics {
        log::debug!("[Dispatcher] Started ({:?} failure policy)", self.policy);
        while let Some(delivery) = self.receiver.recv().await {
            self.deliver(delivery);
        }
        log::debug!("[Dispatcher] All bus handles dropped, stopping");
        self.shared.metrics()
    }

    /// Run the dispatcher on the current tokio runtime.
    ///
    /// Deliveries are only deferred until the emitting code yields on a
    /// current-thread runtime. On a multi-thread runtime a worker may pick up
    /// a delivery while the emitter is still running, so this logs a warning.
    pub fn spawn(self) -> JoinHandle<EventBusMetrics> {
        if !is_current_thread(&Handle::current()) {
            log::warn!(
                "[Dispatcher] Spawned on a multi-thread runtime; deliveries may run before the emitting code yields"
            );
        }
        tokio::spawn(self.run())
    }

    fn deliver(&self, delivery: Delivery<K, P>) {
        let Delivery {
            event,
            payload,
            handlers,
        } = delivery;

        log::trace!(
            "[Dispatcher] Delivering {:?} to {} subscribers",
            event,
            handlers.len()
        );

        for (position, handler) in handlers.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&payload)));
            Counters::bump(&self.shared.counters.deliveries);

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.report(&event, position, format!("{err:#}"), false),
                Err(panic) => self.report(&event, position, panic_message(panic.as_ref()), true),
            }
        }
    }

    fn report(&self, event: &K, position: usize, message: String, panicked: bool) {
        Counters::bump(&self.shared.counters.failures);

        let failure = DeliveryFailure {
            event: format!("{:?}", event),
            position,
            message,
            panicked,
            at: Utc::now(),
        };

        if let Some(hook) = &self.hook {
            hook(&failure);
        }

        match self.policy {
            FailurePolicy::Log => log::error!("[Dispatcher] {}", failure),
            FailurePolicy::Collect => self.shared.record_failure(failure, self.max_failures),
            FailurePolicy::Ignore => {}
        }
    }
}

fn is_current_thread(handle: &Handle) -> bool {
    handle.runtime_flavor() == RuntimeFlavor::CurrentThread
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "subscriber panicked".to_string()
    }
}
