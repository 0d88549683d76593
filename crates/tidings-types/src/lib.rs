pub mod config;
pub mod config_manager;
pub mod events;

pub use config::{
    BusConfig, Config, DEFAULT_CONFIG, DEFAULT_LOG_LEVEL, DEFAULT_MAX_COLLECTED_FAILURES,
    FailurePolicy,
};
pub use events::{
    ClientRecord, ClientRemovedEvent, ClientStatus, ClientUpsertedEvent, ClientsLoadedEvent,
};
