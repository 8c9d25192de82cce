//! Persisted provider order and enabled state.
//!
//! Stored as JSON (default `~/.config/reelsource/providers.json`):
//!
//! ```json
//! {"providers": [{"id": "flix", "path": "/…/providers/flix", "disabled": false}]}
//! ```
//!
//! The list order is the user's provider order and stays index-consistent
//! with the registry.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPreference {
    pub id: String,
    /// Local bundle path.
    pub path: PathBuf,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PreferencesFile {
    #[serde(default)]
    providers: Vec<ProviderPreference>,
}

/// Ordered provider preferences, optionally backed by a file.
#[derive(Debug, Default)]
pub struct ProviderPreferences {
    path: Option<PathBuf>,
    items: Vec<ProviderPreference>,
}

impl ProviderPreferences {
    /// Preferences that live only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open preferences stored at `path`.
    ///
    /// Returns an empty list if the file doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file: PreferencesFile = serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON in {}", path.display()))?;
            file.providers
        } else {
            Vec::new()
        };
        Ok(Self {
            path: Some(path),
            items,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn items(&self) -> &[ProviderPreference] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&ProviderPreference> {
        self.items.iter().find(|p| p.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|p| p.id == id)
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.get(id).is_some_and(|p| p.disabled)
    }

    /// Append `id` if unknown, otherwise refresh its bundle path in place.
    pub fn upsert(&mut self, id: &str, path: &Path) {
        match self.items.iter_mut().find(|p| p.id == id) {
            Some(existing) => existing.path = path.to_path_buf(),
            None => self.items.push(ProviderPreference {
                id: id.to_string(),
                path: path.to_path_buf(),
                disabled: false,
            }),
        }
    }

    /// Returns `false` if `id` is unknown.
    pub fn set_disabled(&mut self, id: &str, disabled: bool) -> bool {
        match self.items.iter_mut().find(|p| p.id == id) {
            Some(pref) => {
                pref.disabled = disabled;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<ProviderPreference> {
        let index = self.position(id)?;
        Some(self.items.remove(index))
    }

    /// Swap the entries for `a` and `b`, if both are known.
    pub fn swap(&mut self, a: &str, b: &str) {
        if let (Some(i), Some(j)) = (self.position(a), self.position(b)) {
            self.items.swap(i, j);
        }
    }

    /// Write the preferences back to their file. A no-op when in memory.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&PreferencesFile {
            providers: self.items.clone(),
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}
