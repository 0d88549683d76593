use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    #[default]
    Active,
    Inactive,
    Prospect,
}

/// A single entry of the client list
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: ClientStatus,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ClientRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            company: None,
            email: None,
            phone: None,
            status: ClientStatus::default(),
            updated_at: None,
        }
    }

    /// Parse a JSON array of client records
    pub fn list_from_json(raw: &str) -> anyhow::Result<Vec<Self>> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Published when the full client list has been (re)loaded
#[derive(Clone, Debug)]
pub struct ClientsLoadedEvent {
    pub clients: Vec<ClientRecord>,
}

/// Published when a client was added or changed
#[derive(Clone, Debug)]
pub struct ClientUpsertedEvent {
    pub client: ClientRecord,
}

/// Published when a client was removed from the list
#[derive(Clone, Debug)]
pub struct ClientRemovedEvent {
    pub client_id: String,
}
