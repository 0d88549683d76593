pub mod core;
pub mod dispatcher;
pub mod hub;

pub use crate::core::{EventBus, EventBusMetrics, EventName, Handler, Unsubscribe, handler};
pub use crate::dispatcher::{DeliveryFailure, Dispatcher, FailureHook};
pub use crate::hub::{
    AnyPayload, ClientRemoved, ClientUpserted, ClientsLoaded, EventHub, HubDispatcher,
    RosterCleared, Topic,
};

// Re-export types for convenience
pub use tidings_types::{
    BusConfig, ClientRecord, ClientRemovedEvent, ClientUpsertedEvent, ClientsLoadedEvent,
    FailurePolicy,
};
