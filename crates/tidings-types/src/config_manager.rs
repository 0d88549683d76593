//! Locating and reading the config file of the `tidings` binary.
//!
//! The file lives at `<config dir>/tidings/config.json` (see [`dirs::config_dir`]).
//! When that location cannot be used, `<temp dir>/tidings/config.json` is used
//! instead. A missing file is seeded with [`DEFAULT_CONFIG`] before it is read.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{Config, DEFAULT_CONFIG};

const APP_DIR: &str = "tidings";
const CONFIG_FILE: &str = "config.json";

/// Config path to use for this user, seeded with the default config if missing
pub fn resolve_config_path() -> Result<PathBuf> {
    let mut candidates = Vec::with_capacity(2);
    match dirs::config_dir() {
        Some(dir) => candidates.push(dir.join(APP_DIR).join(CONFIG_FILE)),
        None => log::warn!("No per-user config directory on this platform"),
    }
    candidates.push(std::env::temp_dir().join(APP_DIR).join(CONFIG_FILE));

    first_usable(candidates)
}

/// First candidate that already exists or can be seeded
fn first_usable(candidates: Vec<PathBuf>) -> Result<PathBuf> {
    let mut last_error = None;
    for path in candidates {
        match seed_default_config(&path) {
            Ok(()) => return Ok(path),
            Err(e) => {
                log::warn!("Cannot use config at {}: {:#}", path.display(), e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no config location available")))
}

/// Write [`DEFAULT_CONFIG`] to `path` unless a file is already there
pub fn seed_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        log::debug!("Using existing config file: {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("Wrote default config to {}", path.display());
    Ok(())
}

/// Read the config at `path`.
///
/// A relative `clients_fixture` is taken relative to the directory holding
/// the config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config = Config::from_json(&raw)
        .with_context(|| format!("invalid config at {}", path.display()))?;

    if let (Some(fixture), Some(base)) = (config.clients_fixture.as_mut(), path.parent()) {
        if fixture.is_relative() {
            *fixture = base.join(&*fixture);
        }
    }

    Ok(config)
}

/// The embedded default config
pub fn default_config() -> Result<Config> {
    Config::from_json(DEFAULT_CONFIG).context("invalid embedded default config")
}
