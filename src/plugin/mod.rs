//! Provider plugin system.
//!
//! Providers ship as bundles: a directory with a `manifest.json` and a
//! compiled entry point. Process-hosted bundles run their entry point as an
//! external binary speaking JSON over stdin/stdout; builtin bundles name a
//! constructor compiled into the host.
//!
//! # Layout
//!
//! ```text
//! ~/.local/share/reelsource/providers/
//!   flix/
//!     manifest.json     {"entry_point": "flix-provider", "name": "Flix", "version": "1.2.0"}
//!     flix-provider     executable
//!     resources/        only when "requires_resources": true
//! ```
//!
//! # Protocol
//!
//! Input (one JSON line on stdin):
//! ```json
//! {"method": "search", "params": {"query": "Fight Club", "page": 1, "media_type": "movie"}}
//! ```
//!
//! Output (JSON on stdout, `links` answers with one event per line):
//! ```json
//! {"type": "stream", "url": "https://cdn.example/fc.m3u8", "label": "1080p"}
//! {"type": "subtitle", "url": "https://cdn.example/fc.en.vtt", "language": "en"}
//! ```

pub mod api_registry;
pub mod loader;
pub mod manifest;
pub mod preferences;
pub mod process;
pub mod registry;
pub mod updater;

use std::path::PathBuf;

use thiserror::Error;

pub use api_registry::ProviderApiRegistry;
pub use loader::{BuiltinLoader, PluginLoader, ProviderInstance};
pub use manifest::BundleManifest;
pub use preferences::{ProviderPreference, ProviderPreferences};
pub use process::ProcessLoader;
pub use registry::{ProviderEntry, ProviderRegistry, RegistryEvent};

/// Errors raised while loading a provider bundle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("bundle manifest not found at {0}")]
    ManifestMissing(PathBuf),

    #[error("invalid bundle manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("bundled resources missing at {0}")]
    ResourcesMissing(PathBuf),

    #[error("provider '{id}' needs unsupported capability '{capability}'")]
    UnsupportedCapability { id: String, capability: String },

    #[error("provider '{0}' is already loaded")]
    DuplicateId(String),

    #[error("failed to construct provider '{id}': {reason}")]
    ConstructorFailed { id: String, reason: String },

    #[error("provider '{id}' crashed while creating its API: {reason}")]
    ApiCrashed { id: String, reason: String },

    #[error("provider '{0}' is not loaded")]
    NotLoaded(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Errors raised while unloading a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnloadError {
    #[error("provider '{0}' is not loaded")]
    NotLoaded(String),

    #[error("provider '{id}' teardown failed: {reason}")]
    TeardownFailed { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),
}
