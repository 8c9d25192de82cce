//! `reelsource` - provider plugins and media-link resolution for streaming clients
//!
//! # Features
//!
//! - **Provider plugins**: load, enable, reorder and remove provider bundles,
//!   either compiled in or hosted as external processes
//! - **Title matching**: map a catalog title to a provider's own id through
//!   paginated search and release-date / season heuristics
//! - **Link resolution**: sweep a provider's servers until one yields streams,
//!   collecting subtitles along the way
//! - **Links cache**: observable per-episode snapshots of resolved links
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use reelsource::plugin::{ProcessLoader, ProviderApiRegistry, ProviderPreferences, ProviderRegistry};
//! use reelsource::provider::{Film, MediaType};
//! use reelsource::resolve::{ResolutionOrchestrator, ResolveRequest};
//! use reelsource::LinksCache;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(ProviderRegistry::new(
//!         Arc::new(ProcessLoader::default()),
//!         Arc::new(ProviderApiRegistry::new()),
//!         ProviderPreferences::open("providers.json")?,
//!     ));
//!     registry.load_all().await;
//!
//!     let orchestrator = ResolutionOrchestrator::new(registry, Arc::new(LinksCache::new()));
//!     let film = Film {
//!         id: "tmdb-550".into(),
//!         title: "Fight Club".into(),
//!         media_type: MediaType::Movie,
//!         release_date: Some("1999-10-15".into()),
//!         season_count: None,
//!         catalog_id: None,
//!     };
//!     let links = orchestrator.resolve(ResolveRequest::new(film)).await?.wait().await?;
//!     println!("{} streams from {}", links.streams.len(), links.provider_id);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod plugin;
pub mod provider;
pub mod resolve;

pub use cache::{CacheKey, CachedLinks, LinksCache};
pub use config::Config;
pub use plugin::{LoadError, ProviderRegistry, UnloadError};
pub use provider::{Episode, Film, MediaType, ProviderApi, ProviderError, ProviderMetadata};
pub use resolve::{ErrorCategory, ResolutionError, ResolutionOrchestrator, ResolveRequest};

/// Version of reelsource
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
