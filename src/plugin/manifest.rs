//! Bundle manifest parsing.
//!
//! A bundle is a directory holding the provider's compiled entry point and a
//! `manifest.json` describing it:
//!
//! ```json
//! {"entry_point": "flix-provider", "name": "Flix", "version": "1.2.0", "requires_resources": false}
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::LoadError;

/// File name of the manifest inside a bundle.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Directory that must exist next to the manifest when
/// [`BundleManifest::requires_resources`] is set.
pub const RESOURCES_DIR: &str = "resources";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Entry point the loader instantiates: an executable path relative to the
    /// bundle for process-hosted providers, a factory name for builtin ones.
    #[serde(alias = "entryPoint")]
    pub entry_point: String,
    /// Declared display name.
    pub name: String,
    pub version: String,
    #[serde(default, alias = "requiresResources")]
    pub requires_resources: bool,
}

impl BundleManifest {
    /// Read and validate `manifest.json` from the bundle at `bundle`.
    pub fn read(bundle: &Path) -> Result<Self, LoadError> {
        let path = bundle.join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoadError::ManifestMissing(path));
            }
            Err(e) => return Err(LoadError::Io(e.to_string())),
        };
        Self::parse(&content).map_err(|reason| LoadError::ManifestInvalid { path, reason })
    }

    fn parse(content: &str) -> Result<Self, String> {
        let manifest: Self = serde_json::from_str(content).map_err(|e| e.to_string())?;
        if manifest.entry_point.trim().is_empty() {
            return Err("entry_point is empty".to_string());
        }
        if manifest.name.trim().is_empty() {
            return Err("name is empty".to_string());
        }
        Ok(manifest)
    }

    /// Write the manifest into `bundle`, creating the directory if needed.
    pub fn write(&self, bundle: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(bundle)?;
        let path = bundle.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Check that bundled resources are present when the manifest asks for them.
    pub fn check_resources(&self, bundle: &Path) -> Result<(), LoadError> {
        let dir = bundle.join(RESOURCES_DIR);
        if self.requires_resources && !dir.is_dir() {
            return Err(LoadError::ResourcesMissing(dir));
        }
        Ok(())
    }
}
