//! Turning an on-disk bundle into a runnable [`ProviderInstance`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::manifest::BundleManifest;
use super::LoadError;
use crate::provider::{ProviderApi, ProviderError, ProviderMetadata};

/// A loaded, runnable provider. Owned by the registry for as long as the
/// provider stays loaded.
#[async_trait]
pub trait ProviderInstance: Send + Sync {
    fn manifest(&self) -> &BundleManifest;

    /// Build the live API handle. May fail independently of the bundle being
    /// valid (e.g. network-dependent setup).
    async fn create_api(&self) -> Result<Arc<dyn ProviderApi>, ProviderError>;

    /// Release whatever the instance holds. Called once, when the instance is
    /// unloaded or discarded.
    async fn teardown(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Loads provider bundles. Loading is blocking I/O and is always run off the
/// async executor by the registry.
pub trait PluginLoader: Send + Sync {
    fn load(
        &self,
        bundle: &Path,
        metadata: &ProviderMetadata,
    ) -> Result<Box<dyn ProviderInstance>, LoadError>;
}

/// Reject providers needing capabilities the host does not offer.
pub fn check_capabilities(
    metadata: &ProviderMetadata,
    host: &BTreeSet<String>,
) -> Result<(), LoadError> {
    match metadata.capabilities.difference(host).next() {
        Some(missing) => Err(LoadError::UnsupportedCapability {
            id: metadata.id.clone(),
            capability: missing.clone(),
        }),
        None => Ok(()),
    }
}

/// Constructor for a compiled-in provider, keyed by manifest entry point.
pub type ProviderFactory =
    Arc<dyn Fn(BundleManifest) -> Result<Box<dyn ProviderInstance>, ProviderError> + Send + Sync>;

/// Loader for providers compiled into the host.
///
/// The bundle still carries a manifest; its `entry_point` names the factory
/// to call. Entry points without a factory go to the fallback loader, if any.
#[derive(Default)]
pub struct BuiltinLoader {
    factories: HashMap<String, ProviderFactory>,
    fallback: Option<Arc<dyn PluginLoader>>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `entry_point`.
    #[must_use]
    pub fn with_factory<F>(mut self, entry_point: &str, factory: F) -> Self
    where
        F: Fn(BundleManifest) -> Result<Box<dyn ProviderInstance>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(entry_point.to_string(), Arc::new(factory));
        self
    }

    /// Delegate unknown entry points to `loader`.
    #[must_use]
    pub fn with_fallback(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.fallback = Some(loader);
        self
    }
}

impl PluginLoader for BuiltinLoader {
    fn load(
        &self,
        bundle: &Path,
        metadata: &ProviderMetadata,
    ) -> Result<Box<dyn ProviderInstance>, LoadError> {
        let manifest = BundleManifest::read(bundle)?;
        let Some(factory) = self.factories.get(&manifest.entry_point) else {
            return match &self.fallback {
                Some(loader) => loader.load(bundle, metadata),
                None => Err(LoadError::ConstructorFailed {
                    id: metadata.id.clone(),
                    reason: format!("no builtin entry point '{}'", manifest.entry_point),
                }),
            };
        };
        manifest.check_resources(bundle)?;

        debug!(provider = %metadata.id, entry = %manifest.entry_point, "Instantiating builtin provider");
        factory(manifest).map_err(|e| LoadError::ConstructorFailed {
            id: metadata.id.clone(),
            reason: e.to_string(),
        })
    }
}
