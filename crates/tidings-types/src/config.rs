use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Embedded default configuration, written to the user data directory on first run.
pub const DEFAULT_CONFIG: &str = include_str!("../default-config.json");

pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_MAX_COLLECTED_FAILURES: usize = 64;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    /// Default tracing filter directive, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional JSON file holding the initial client list
    #[serde(default, alias = "clientsFixture")]
    pub clients_fixture: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            log_level: default_log_level(),
            clients_fixture: None,
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Event bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// What happens when a subscriber fails during delivery
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Upper bound of the failure log kept under [`FailurePolicy::Collect`]
    #[serde(default = "default_max_collected_failures")]
    pub max_collected_failures: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            max_collected_failures: DEFAULT_MAX_COLLECTED_FAILURES,
        }
    }
}

fn default_max_collected_failures() -> usize {
    DEFAULT_MAX_COLLECTED_FAILURES
}

/// Handling of subscriber failures (returned errors and panics).
///
/// Delivery to the remaining subscribers always continues; the policy only
/// decides where the failure is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Report through `log::error!`
    #[default]
    Log,
    /// Keep the most recent failures in a bounded log on the bus
    Collect,
    /// Drop silently
    Ignore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_default_config_parses() {
        let config = Config::from_json(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.bus.failure_policy, FailurePolicy::Log);
        assert_eq!(config.bus.max_collected_failures, 64);
        assert!(config.clients_fixture.is_none());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.bus.failure_policy, FailurePolicy::Log);
        assert_eq!(
            config.bus.max_collected_failures,
            DEFAULT_MAX_COLLECTED_FAILURES
        );
    }

    #[test]
    fn test_failure_policy_is_lowercase() {
        let config =
            Config::from_json(r#"{"bus": {"failure_policy": "collect"}, "clientsFixture": "c.json"}"#)
                .unwrap();
        assert_eq!(config.bus.failure_policy, FailurePolicy::Collect);
        assert_eq!(config.clients_fixture, Some(PathBuf::from("c.json")));

        assert!(Config::from_json(r#"{"bus": {"failure_policy": "Panic"}}"#).is_err());
    }
}
