use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tidings_types::{
    BusConfig, ClientRecord, ClientRemovedEvent, ClientUpsertedEvent, ClientsLoadedEvent,
};

use crate::core::{EventBus, EventBusMetrics, Unsubscribe, handler};
use crate::dispatcher::{DeliveryFailure, Dispatcher};

/// A named event bound to a single payload type
pub trait Topic: 'static {
    type Payload: Send + Sync + 'static;
    const NAME: &'static str;
}

pub type AnyPayload = Arc<dyn Any + Send + Sync>;

pub type HubDispatcher = Dispatcher<&'static str, AnyPayload>;

pub struct ClientsLoaded;

impl Topic for ClientsLoaded {
    type Payload = ClientsLoadedEvent;
    const NAME: &'static str = "clients:loaded";
}

pub struct ClientUpserted;

impl Topic for ClientUpserted {
    type Payload = ClientUpsertedEvent;
    const NAME: &'static str = "clients:upserted";
}

pub struct ClientRemoved;

impl Topic for ClientRemoved {
    type Payload = ClientRemovedEvent;
    const NAME: &'static str = "clients:removed";
}

pub struct RosterCleared;

impl Topic for RosterCleared {
    type Payload = ();
    const NAME: &'static str = "clients:cleared";
}

/// Typed facade over an [`EventBus`] keyed by topic names
#[derive(Clone)]
pub struct EventHub {
    bus: EventBus<&'static str, AnyPayload>,
}

impl EventHub {
    pub fn new() -> (Self, HubDispatcher) {
        Self::with_config(&BusConfig::default())
    }

    pub fn with_config(config: &BusConfig) -> (Self, HubDispatcher) {
        let (bus, dispatcher) = EventBus::with_config(config);
        (Self { bus }, dispatcher)
    }

    /// The untyped bus underneath
    pub fn bus(&self) -> &EventBus<&'static str, AnyPayload> {
        &self.bus
    }

    pub fn subscribe<T, F>(&self, callback: F) -> Unsubscribe
    where
        T: Topic,
        F: Fn(&T::Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(
            T::NAME,
            handler(move |payload: &AnyPayload| {
                let payload = (**payload).downcast_ref::<T::Payload>().ok_or_else(|| {
                    anyhow!(
                        "payload of '{}' is not a {}",
                        T::NAME,
                        type_name::<T::Payload>()
                    )
                })?;
                callback(payload)
            }),
        )
    }

    pub fn subscribe_fn<T, F>(&self, callback: F) -> Unsubscribe
    where
        T: Topic,
        F: Fn(&T::Payload) + Send + Sync + 'static,
    {
        self.subscribe::<T, _>(move |payload| {
            callback(payload);
            Ok(())
        })
    }

    pub fn subscribe_once<T, F>(&self, callback: F) -> Unsubscribe
    where
        T: Topic,
        F: FnOnce(&T::Payload) + Send + 'static,
    {
        self.bus.subscribe_once(T::NAME, move |payload: &AnyPayload| {
            match (**payload).downcast_ref::<T::Payload>() {
                Some(payload) => callback(payload),
                None => log::error!(
                    "[EventHub] Dropping one-shot delivery of '{}': payload is not a {}",
                    T::NAME,
                    type_name::<T::Payload>()
                ),
            }
        })
    }

    pub fn emit<T: Topic>(&self, payload: T::Payload) -> bool {
        self.bus.emit(T::NAME, Arc::new(payload))
    }

    /// Number of live subscribers to topic `T`
    pub fn subscriber_count<T: Topic>(&self) -> usize {
        self.bus.subscriber_count(&T::NAME)
    }

    /// Live subscriber count per topic name
    pub fn stats(&self) -> HashMap<&'static str, usize> {
        self.bus.stats()
    }

    /// Counters of the underlying bus
    pub fn metrics(&self) -> EventBusMetrics {
        self.bus.metrics()
    }

    /// Failures collected under the `collect` policy, oldest first
    pub fn failures(&self) -> Vec<DeliveryFailure> {
        self.bus.failures()
    }

    /// Drop every subscription on every topic
    pub fn remove_all_listeners(&self) {
        self.bus.remove_all_listeners();
    }

    /// Client updates concerning `client_id` only
    pub fn subscribe_client_updates_for<F>(&self, client_id: String, callback: F) -> Unsubscribe
    where
        F: Fn(&ClientRecord) + Send + Sync + 'static,
    {
        self.subscribe_fn::<ClientUpserted, _>(move |event| {
            if event.client.id == client_id {
                callback(&event.client);
            }
        })
    }

    pub fn publish_clients_loaded(&self, clients: Vec<ClientRecord>) -> bool {
        self.emit::<ClientsLoaded>(ClientsLoadedEvent { clients })
    }

    pub fn publish_client_upserted(&self, client: ClientRecord) -> bool {
        self.emit::<ClientUpserted>(ClientUpsertedEvent { client })
    }

    pub fn publish_client_removed(&self, client_id: impl Into<String>) -> bool {
        self.emit::<ClientRemoved>(ClientRemovedEvent {
            client_id: client_id.into(),
        })
    }

    pub fn publish_roster_cleared(&self) -> bool {
        self.emit::<RosterCleared>(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tidings_types::FailurePolicy;

    struct Shout;

    impl Topic for Shout {
        type Payload = String;
        const NAME: &'static str = "shout";
    }

    /// Same name as `Shout`, different payload
    struct Impostor;

    impl Topic for Impostor {
        type Payload = u64;
        const NAME: &'static str = "shout";
    }

    #[test]
    fn test_publish_subscribe() {
        let (hub, mut dispatcher) = EventHub::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        hub.subscribe_fn::<ClientUpserted, _>(move |event| {
            received_clone.lock().unwrap().push(event.client.name.clone());
        });

        assert!(hub.publish_client_upserted(ClientRecord::new("c-1", "Ada")));
        assert!(received.lock().unwrap().is_empty());

        dispatcher.run_pending();
        assert_eq!(*received.lock().unwrap(), vec!["Ada"]);
    }

    #[test]
    fn test_topics_are_isolated() {
        let (hub, mut dispatcher) = EventHub::new();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let removed_clone = removed.clone();

        hub.subscribe_fn::<ClientRemoved, _>(move |event| {
            removed_clone.lock().unwrap().push(event.client_id.clone());
        });

        assert!(!hub.publish_client_upserted(ClientRecord::new("c-1", "Ada")));
        assert!(hub.publish_client_removed("c-1"));
        dispatcher.run_pending();

        assert_eq!(*removed.lock().unwrap(), vec!["c-1"]);
        assert_eq!(hub.stats(), HashMap::from([(ClientRemoved::NAME, 1)]));
        assert_eq!(hub.subscriber_count::<ClientUpserted>(), 0);
    }

    #[test]
    fn test_payload_mismatch_is_a_delivery_failure() {
        let config = BusConfig {
            failure_policy: FailurePolicy::Collect,
            ..BusConfig::default()
        };
        let (hub, mut dispatcher) = EventHub::with_config(&config);
        let shouts = Arc::new(Mutex::new(Vec::new()));
        let shouts_clone = shouts.clone();

        hub.subscribe_fn::<Impostor, _>(|_| {});
        hub.subscribe_fn::<Shout, _>(move |text| shouts_clone.lock().unwrap().push(text.clone()));

        hub.emit::<Shout>("hey".to_string());
        dispatcher.run_pending();

        assert_eq!(*shouts.lock().unwrap(), vec!["hey"]);
        let failures = hub.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("is not a u64"));
    }

    #[test]
    fn test_subscribe_client_updates_for() {
        let (hub, mut dispatcher) = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        hub.subscribe_client_updates_for("c-2".to_string(), move |client| {
            seen_clone.lock().unwrap().push(client.name.clone());
        });

        hub.publish_client_upserted(ClientRecord::new("c-1", "Ada"));
        hub.publish_client_upserted(ClientRecord::new("c-2", "Grace"));
        dispatcher.run_pending();

        assert_eq!(*seen.lock().unwrap(), vec!["Grace"]);
    }

    #[test]
    fn test_subscribe_once_and_clear() {
        let (hub, mut dispatcher) = EventHub::new();
        let cleared = Arc::new(Mutex::new(0));
        let cleared_clone = cleared.clone();

        hub.subscribe_once::<RosterCleared, _>(move |_| *cleared_clone.lock().unwrap() += 1);
        hub.subscribe_fn::<ClientsLoaded, _>(|_| {});

        hub.publish_roster_cleared();
        dispatcher.run_pending();
        assert!(!hub.publish_roster_cleared());
        assert_eq!(*cleared.lock().unwrap(), 1);

        hub.remove_all_listeners();
        assert!(hub.stats().is_empty());
        assert!(!hub.publish_clients_loaded(Vec::new()));
    }
}
