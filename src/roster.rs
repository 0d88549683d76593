//! Client Roster - live client list fed by hub events
//!
//! The roster never mutates itself directly: producers publish client events
//! on the [`EventHub`] and the roster applies them when they are delivered.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};

use tidings_event_bus::{
    ClientRemoved, ClientUpserted, ClientsLoaded, EventHub, RosterCleared, Unsubscribe,
};
use tidings_types::ClientRecord;

pub struct ClientRoster {
    clients: Arc<Mutex<Vec<ClientRecord>>>,
    subscriptions: Vec<Unsubscribe>,
}

impl ClientRoster {
    /// Create a roster and subscribe it to the client topics of `event_hub`
    pub fn attach(event_hub: &EventHub) -> Self {
        let clients: Arc<Mutex<Vec<ClientRecord>>> = Arc::new(Mutex::new(Vec::new()));
        let mut subscriptions = Vec::new();

        let list = clients.clone();
        subscriptions.push(event_hub.subscribe_fn::<ClientsLoaded, _>(move |event| {
            log::debug!("Loaded {} clients", event.clients.len());
            *lock(&list) = event.clients.clone();
        }));

        let list = clients.clone();
        subscriptions.push(event_hub.subscribe::<ClientUpserted, _>(move |event| {
            upsert(&mut lock(&list), event.client.clone())
        }));

        let list = clients.clone();
        subscriptions.push(event_hub.subscribe_fn::<ClientRemoved, _>(move |event| {
            let mut list = lock(&list);
            let before = list.len();
            list.retain(|client| client.id != event.client_id);
            if list.len() == before {
                log::debug!("Client {} was not in the roster", event.client_id);
            }
        }));

        let list = clients.clone();
        subscriptions.push(event_hub.subscribe_fn::<RosterCleared, _>(move |_| {
            lock(&list).clear();
        }));

        Self {
            clients,
            subscriptions,
        }
    }

    pub fn clients(&self) -> Vec<ClientRecord> {
        lock(&self.clients).clone()
    }

    pub fn get(&self, client_id: &str) -> Option<ClientRecord> {
        lock(&self.clients)
            .iter()
            .find(|client| client.id == client_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop following hub events. Safe to call more than once.
    pub fn detach(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

fn lock(clients: &Mutex<Vec<ClientRecord>>) -> MutexGuard<'_, Vec<ClientRecord>> {
    clients.lock().unwrap_or_else(PoisonError::into_inner)
}

fn upsert(list: &mut Vec<ClientRecord>, client: ClientRecord) -> Result<()> {
    if client.id.trim().is_empty() {
        bail!("client '{}' has no id", client.name);
    }
    match list.iter_mut().find(|existing| existing.id == client.id) {
        Some(existing) => *existing = client,
        None => list.push(client),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut list = vec![ClientRecord::new("c-1", "Ada")];

        upsert(&mut list, ClientRecord::new("c-2", "Grace")).unwrap();
        upsert(&mut list, ClientRecord::new("c-1", "Ada Lovelace")).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "Ada Lovelace");
        assert!(upsert(&mut list, ClientRecord::new(" ", "Nobody")).is_err());
    }

    #[test]
    fn test_roster_follows_events() {
        let (hub, mut dispatcher) = EventHub::new();
        let roster = ClientRoster::attach(&hub);

        hub.publish_clients_loaded(vec![
            ClientRecord::new("c-1", "Ada"),
            ClientRecord::new("c-2", "Grace"),
        ]);
        hub.publish_client_removed("c-1");
        assert!(roster.is_empty());

        dispatcher.run_pending();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("c-2").map(|c| c.name), Some("Grace".to_string()));

        hub.publish_roster_cleared();
        dispatcher.run_pending();
        assert!(roster.is_empty());
    }

    #[test]
    fn test_detach() {
        let (hub, mut dispatcher) = EventHub::new();
        let roster = ClientRoster::attach(&hub);
        assert_eq!(hub.stats().len(), 4);

        roster.detach();
        roster.detach();
        assert!(hub.stats().is_empty());

        assert!(!hub.publish_client_upserted(ClientRecord::new("c-1", "Ada")));
        dispatcher.run_pending();
        assert!(roster.is_empty());
    }
}
