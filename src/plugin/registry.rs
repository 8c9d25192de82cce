//! Ordered collection of loaded providers and their enabled state.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};

use super::api_registry::ProviderApiRegistry;
use super::loader::{check_capabilities, PluginLoader, ProviderInstance};
use super::manifest::BundleManifest;
use super::preferences::ProviderPreferences;
use super::{LoadError, UnloadError};
use crate::provider::{ProviderApi, ProviderMetadata};

const EVENT_CAPACITY: usize = 64;

/// State change notifications for provider-management views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added { id: String, enabled: bool },
    Removed { id: String },
    Enabled { id: String },
    Disabled { id: String },
    Reordered { from: usize, to: usize },
}

/// A loaded provider as seen by callers.
#[derive(Clone)]
pub struct ProviderEntry {
    pub metadata: ProviderMetadata,
    pub manifest: BundleManifest,
    pub bundle: PathBuf,
    pub enabled: bool,
    instance: Arc<dyn ProviderInstance>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.metadata.id)
            .field("version", &self.metadata.version)
            .field("bundle", &self.bundle)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

struct RegistryState {
    entries: Vec<ProviderEntry>,
    preferences: ProviderPreferences,
}

impl RegistryState {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.metadata.id == id)
    }

    fn persist(&self) {
        if let Err(e) = self.preferences.save() {
            warn!(error = %e, "Failed to persist provider preferences");
        }
    }
}

/// Owns every loaded [`ProviderInstance`], keeps them in the user's order and
/// mirrors enabled providers' API handles into a [`ProviderApiRegistry`].
pub struct ProviderRegistry {
    loader: Arc<dyn PluginLoader>,
    apis: Arc<ProviderApiRegistry>,
    host_capabilities: BTreeSet<String>,
    state: RwLock<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ProviderRegistry {
    pub fn new(
        loader: Arc<dyn PluginLoader>,
        apis: Arc<ProviderApiRegistry>,
        preferences: ProviderPreferences,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            loader,
            apis,
            host_capabilities: BTreeSet::new(),
            state: RwLock::new(RegistryState {
                entries: Vec::new(),
                preferences,
            }),
            events,
        }
    }

    /// Declare the capabilities this host can offer to providers.
    #[must_use]
    pub fn with_host_capabilities(mut self, capabilities: BTreeSet<String>) -> Self {
        self.host_capabilities = capabilities;
        self
    }

    pub fn apis(&self) -> &Arc<ProviderApiRegistry> {
        &self.apis
    }

    /// Receive an event for every add/remove/toggle/reorder.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, id: &str) -> Option<ProviderEntry> {
        let state = self.state.read().await;
        state.index_of(id).map(|i| state.entries[i].clone())
    }

    /// All loaded providers in user order.
    pub async fn entries(&self) -> Vec<ProviderEntry> {
        self.state.read().await.entries.clone()
    }

    /// Ids of enabled providers in user order.
    pub async fn enabled_ids(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.metadata.id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Load the bundle at `bundle` and register it under `metadata.id`.
    ///
    /// A provider whose API crashes while being created is disabled, with the
    /// flag persisted, and its bundle is loaded once more. That second load
    /// honours the flag, so the provider ends up registered but disabled and
    /// without an API handle. Only a failure to instantiate the bundle again
    /// is reported, and then the preferences are rolled back to match.
    #[instrument(skip(self, metadata), fields(provider = %metadata.id))]
    pub async fn load(&self, bundle: &Path, metadata: ProviderMetadata) -> Result<(), LoadError> {
        check_capabilities(&metadata, &self.host_capabilities)?;
        if self.get(&metadata.id).await.is_some() {
            return Err(LoadError::DuplicateId(metadata.id));
        }

        let mut instance = self.instantiate(bundle, &metadata).await?;
        let disabled = self.state.read().await.preferences.is_disabled(&metadata.id);

        let api = if disabled {
            debug!("Provider is disabled, skipping API creation");
            None
        } else {
            match instance.create_api().await {
                Ok(api) => Some(api),
                Err(e) => {
                    warn!(error = %e, "Provider API crashed on creation, disabling and reloading");
                    let known = self.persist_disabled(&metadata.id, bundle).await;
                    teardown_quietly(instance.as_ref()).await;

                    instance = match self.instantiate(bundle, &metadata).await {
                        Ok(instance) => instance,
                        Err(e) => {
                            if !known {
                                self.forget(&metadata.id).await;
                            }
                            return Err(e);
                        }
                    };
                    None
                }
            }
        };

        let result = self
            .register(bundle, metadata, Arc::clone(&instance), api)
            .await;
        if result.is_err() {
            teardown_quietly(instance.as_ref()).await;
        }
        result
    }

    /// Load every provider recorded in the preferences, in their stored order.
    ///
    /// Failures are logged and returned; they never stop the remaining loads.
    pub async fn load_all(&self) -> Vec<(String, LoadError)> {
        let prefs = self.state.read().await.preferences.items().to_vec();
        let mut failures = Vec::new();

        for pref in prefs {
            if self.get(&pref.id).await.is_some() {
                continue;
            }
            let result = match metadata_from_bundle(&pref.id, &pref.path).await {
                Ok(metadata) => self.load(&pref.path, metadata).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(provider = %pref.id, error = %e, "Failed to restore provider");
                failures.push((pref.id, e));
            }
        }

        failures
    }

    /// Unload `id`: run its teardown hook, drop its API handle and registry
    /// entry, forget its preferences and delete its bundle.
    ///
    /// The removal always completes; a failing teardown hook is reported
    /// afterwards as [`UnloadError::TeardownFailed`].
    #[instrument(skip(self))]
    pub async fn unload(&self, id: &str) -> Result<(), UnloadError> {
        let entry = self
            .get(id)
            .await
            .ok_or_else(|| UnloadError::NotLoaded(id.to_string()))?;

        let teardown = entry.instance.teardown().await;
        self.apis.remove(id);

        {
            let mut state = self.state.write().await;
            let Some(index) = state.index_of(id) else {
                return Err(UnloadError::NotLoaded(id.to_string()));
            };
            state.entries.remove(index);
            state.preferences.remove(id);
            state.persist();
        }
        self.emit(RegistryEvent::Removed { id: id.to_string() });
        info!("Provider unloaded");

        remove_bundle(&entry.bundle)
            .await
            .map_err(|e| UnloadError::Io(e.to_string()))?;

        teardown.map_err(|e| UnloadError::TeardownFailed {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Enable or disable a loaded provider. Disabling keeps the code loaded
    /// but drops its API handle; enabling rebuilds the handle.
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), LoadError> {
        let entry = self
            .get(id)
            .await
            .ok_or_else(|| LoadError::NotLoaded(id.to_string()))?;
        if entry.enabled == enabled {
            return Ok(());
        }

        if enabled {
            let api = entry
                .instance
                .create_api()
                .await
                .map_err(|e| LoadError::ApiCrashed {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;
            self.apis.put(id, api);
        } else {
            self.apis.remove(id);
        }

        {
            let mut state = self.state.write().await;
            let Some(index) = state.index_of(id) else {
                self.apis.remove(id);
                return Err(LoadError::NotLoaded(id.to_string()));
            };
            state.entries[index].enabled = enabled;
            state.preferences.set_disabled(id, !enabled);
            state.persist();
        }

        let id = id.to_string();
        self.emit(if enabled {
            RegistryEvent::Enabled { id }
        } else {
            RegistryEvent::Disabled { id }
        });
        Ok(())
    }

    /// Swap the providers at `from` and `to`. Equal or out-of-range indices
    /// leave the order untouched.
    pub async fn reorder(&self, from: usize, to: usize) {
        {
            let mut state = self.state.write().await;
            let len = state.entries.len();
            if from == to || from >= len || to >= len {
                return;
            }
            state.entries.swap(from, to);
            let a = state.entries[from].metadata.id.clone();
            let b = state.entries[to].metadata.id.clone();
            state.preferences.swap(&a, &b);
            state.persist();
        }
        debug!(from, to, "Providers reordered");
        self.emit(RegistryEvent::Reordered { from, to });
    }

    async fn instantiate(
        &self,
        bundle: &Path,
        metadata: &ProviderMetadata,
    ) -> Result<Arc<dyn ProviderInstance>, LoadError> {
        let loader = Arc::clone(&self.loader);
        let bundle = bundle.to_path_buf();
        let meta = metadata.clone();

        let instance = tokio::task::spawn_blocking(move || loader.load(&bundle, &meta))
            .await
            .map_err(|e| LoadError::ConstructorFailed {
                id: metadata.id.clone(),
                reason: format!("loader panicked: {e}"),
            })??;
        Ok(Arc::from(instance))
    }

    async fn register(
        &self,
        bundle: &Path,
        metadata: ProviderMetadata,
        instance: Arc<dyn ProviderInstance>,
        api: Option<Arc<dyn ProviderApi>>,
    ) -> Result<(), LoadError> {
        let id = metadata.id.clone();
        let enabled = api.is_some();
        {
            let mut state = self.state.write().await;
            if state.index_of(&id).is_some() {
                return Err(LoadError::DuplicateId(id));
            }

            if metadata.name != instance.manifest().name {
                debug!(declared = %instance.manifest().name, "Manifest name differs from catalog name");
            }

            state.preferences.upsert(&id, bundle);
            state.preferences.set_disabled(&id, !enabled);
            let position = state.preferences.position(&id).unwrap_or(usize::MAX);
            let at = state
                .entries
                .iter()
                .position(|e| {
                    state
                        .preferences
                        .position(&e.metadata.id)
                        .is_some_and(|p| p > position)
                })
                .unwrap_or(state.entries.len());

            state.entries.insert(
                at,
                ProviderEntry {
                    manifest: instance.manifest().clone(),
                    metadata,
                    bundle: bundle.to_path_buf(),
                    enabled,
                    instance,
                },
            );
            state.persist();

            if let Some(api) = api {
                self.apis.put(&id, api);
            }
        }

        info!(enabled, "Provider loaded");
        self.emit(RegistryEvent::Added { id, enabled });
        Ok(())
    }

    /// Mark `id` disabled on disk. Returns whether it was already recorded.
    async fn persist_disabled(&self, id: &str, bundle: &Path) -> bool {
        let mut state = self.state.write().await;
        let known = state.preferences.get(id).is_some();
        state.preferences.upsert(id, bundle);
        state.preferences.set_disabled(id, true);
        state.persist();
        known
    }

    async fn forget(&self, id: &str) {
        let mut state = self.state.write().await;
        if state.index_of(id).is_none() && state.preferences.remove(id).is_some() {
            state.persist();
        }
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn teardown_quietly(instance: &dyn ProviderInstance) {
    if let Err(e) = instance.teardown().await {
        debug!(error = %e, "Teardown of discarded instance failed");
    }
}

/// Rebuild a provider's metadata from its bundle manifest.
async fn metadata_from_bundle(id: &str, bundle: &Path) -> Result<ProviderMetadata, LoadError> {
    let bundle = bundle.to_path_buf();
    let manifest = tokio::task::spawn_blocking(move || BundleManifest::read(&bundle))
        .await
        .map_err(|e| LoadError::Io(e.to_string()))??;
    Ok(ProviderMetadata::new(id, manifest.name, manifest.version))
}

async fn remove_bundle(bundle: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(bundle).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(bundle).await,
        Ok(_) => tokio::fs::remove_file(bundle).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
