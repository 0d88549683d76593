// End-to-end: hub, spawned dispatcher and roster wired together
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tidings::{ClientRecord, ClientRoster, EventHub};
use tidings_event_bus::{BusConfig, ClientUpserted, FailurePolicy};

#[tokio::test]
async fn test_roster_updates_after_dispatch() {
    let (hub, dispatcher) = EventHub::new();
    let task = dispatcher.spawn();
    let roster = ClientRoster::attach(&hub);

    hub.publish_clients_loaded(tidings::sample_clients().unwrap());
    hub.publish_client_upserted(ClientRecord::new("c-2001", "Alan Turing"));
    hub.publish_client_removed("c-1001");

    // Nothing is applied before the current code yields
    assert!(roster.is_empty());

    drop(hub);
    let metrics = task.await.unwrap();

    assert_eq!(roster.len(), 4);
    assert!(roster.get("c-1001").is_none());
    assert_eq!(
        roster.get("c-2001").map(|client| client.name),
        Some("Alan Turing".to_string())
    );
    assert_eq!(metrics.events_emitted, 3);
    assert_eq!(metrics.failures, 0);
}

#[tokio::test]
async fn test_roster_untouched_while_emitter_keeps_running() {
    let (hub, dispatcher) = EventHub::new();
    let task = dispatcher.spawn();
    let roster = ClientRoster::attach(&hub);

    hub.publish_clients_loaded(tidings::sample_clients().unwrap());

    // Synchronous work after the publish, without yielding to the runtime
    let deadline = Instant::now() + Duration::from_millis(100);
    while Instant::now() < deadline {
        assert!(roster.is_empty());
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(hub.metrics().deliveries, 0);

    drop(hub);
    task.await.unwrap();
    assert_eq!(roster.len(), 4);
}

#[tokio::test]
async fn test_invalid_update_does_not_block_other_subscribers() {
    let config = BusConfig {
        failure_policy: FailurePolicy::Collect,
        ..BusConfig::default()
    };
    let (hub, dispatcher) = EventHub::with_config(&config);
    let task = dispatcher.spawn();

    let roster = ClientRoster::attach(&hub);
    let audit = Arc::new(Mutex::new(Vec::new()));
    let audit_clone = audit.clone();
    hub.subscribe_fn::<ClientUpserted, _>(move |event| {
        audit_clone.lock().unwrap().push(event.client.name.clone());
    });

    hub.publish_client_upserted(ClientRecord::new("", "Nameless"));
    hub.publish_client_upserted(ClientRecord::new("c-1", "Ada"));

    // Two emits with two subscribers each
    while hub.metrics().deliveries < 4 {
        tokio::task::yield_now().await;
    }

    let failures = hub.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("Nameless"));
    assert_eq!(*audit.lock().unwrap(), vec!["Nameless", "Ada"]);
    assert_eq!(roster.len(), 1);

    roster.detach();
    assert_eq!(hub.stats().len(), 1);

    drop(hub);
    task.await.unwrap();
}
