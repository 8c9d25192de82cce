//! Live API handles of enabled providers, keyed by provider id.
//!
//! Kept apart from [`ProviderRegistry`](super::ProviderRegistry): a bundle
//! can be loaded yet unusable because its API failed to construct, and an
//! API handle can be rebuilt (re-enable) without reloading the bundle.

use std::sync::Arc;

use dashmap::DashMap;

use crate::provider::ProviderApi;

#[derive(Default)]
pub struct ProviderApiRegistry {
    apis: DashMap<String, Arc<dyn ProviderApi>>,
}

impl ProviderApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProviderApi>> {
        self.apis.get(id).map(|api| Arc::clone(api.value()))
    }

    /// Insert or replace the handle for `id`.
    pub fn put(&self, id: &str, api: Arc<dyn ProviderApi>) {
        self.apis.insert(id.to_string(), api);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<dyn ProviderApi>> {
        self.apis.remove(id).map(|(_, api)| api)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.apis.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

impl std::fmt::Debug for ProviderApiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<String> = self.apis.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        f.debug_struct("ProviderApiRegistry").field("apis", &ids).finish()
    }
}
