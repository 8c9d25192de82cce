//! Host configuration loaded from `~/.config/reelsource/config.toml`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::resolve::matcher::DEFAULT_MAX_SEARCH_PAGES;

const APP_DIR: &str = "reelsource";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where installed provider bundles live, one directory per provider.
    pub providers_dir: PathBuf,
    /// Persisted provider order and enabled flags.
    pub preferences_path: PathBuf,
    /// JSON list of installable providers, checked by `providers updates`.
    pub catalog_url: Option<String>,
    pub max_search_pages: u32,
    pub request_timeout_secs: u64,
    /// Capabilities this host offers; providers requiring others are rejected.
    pub host_capabilities: BTreeSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers_dir: data_dir().join("providers"),
            preferences_path: config_dir().join("providers.json"),
            catalog_url: None,
            max_search_pages: DEFAULT_MAX_SEARCH_PAGES,
            request_timeout_secs: 30,
            host_capabilities: BTreeSet::new(),
        }
    }
}

impl Config {
    /// Load from the default location.
    ///
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load from `path`, falling back to defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Path to the config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
