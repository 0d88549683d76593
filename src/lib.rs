pub mod logging;
pub mod roster;

use std::path::Path;

use anyhow::{Context as _, Result};

pub use roster::ClientRoster;
pub use tidings_event_bus::{EventBusMetrics, EventHub, HubDispatcher};
pub use tidings_types::{ClientRecord, Config, config_manager};

/// Client list bundled with the binary, used when no fixture is configured
pub const SAMPLE_CLIENTS: &str = include_str!("../fixtures/clients.json");

pub fn sample_clients() -> Result<Vec<ClientRecord>> {
    ClientRecord::list_from_json(SAMPLE_CLIENTS).context("invalid bundled client list")
}

pub fn load_clients(path: &Path) -> Result<Vec<ClientRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    ClientRecord::list_from_json(&raw)
        .with_context(|| format!("invalid client list at {}", path.display()))
}
