//! In-memory provider with scripted answers, for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::plugin::{
    BuiltinLoader, BundleManifest, ProviderApiRegistry, ProviderInstance, ProviderPreferences,
    ProviderRegistry,
};

use super::api::{LinkSink, ProviderApi, ProviderError};
use super::types::{
    Episode, MediaDetails, MediaType, ProviderMetadata, SearchPage, SearchResult, Stream,
    Subtitle,
};

pub(crate) struct ScriptedProvider {
    id: String,
    pages: Vec<SearchPage>,
    details: HashMap<String, MediaDetails>,
    servers: Vec<String>,
    failing_servers: HashSet<String>,
    direct_error: Option<ProviderError>,
    hang_search: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            pages: Vec::new(),
            details: HashMap::new(),
            servers: Vec::new(),
            failing_servers: HashSet::new(),
            direct_error: None,
            hang_search: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add the next search page. `has_next_page` is set on the previous one.
    pub(crate) fn page(mut self, results: Vec<SearchResult>) -> Self {
        if let Some(prev) = self.pages.last_mut() {
            prev.has_next_page = true;
        }
        let page = u32::try_from(self.pages.len()).unwrap() + 1;
        self.pages.push(SearchPage {
            results,
            page,
            has_next_page: false,
            total_pages: None,
        });
        self
    }

    pub(crate) fn details(mut self, details: MediaDetails) -> Self {
        self.details.insert(details.id.clone(), details);
        self
    }

    pub(crate) fn servers(mut self, names: &[&str]) -> Self {
        self.servers = names.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub(crate) fn failing(mut self, names: &[&str]) -> Self {
        self.failing_servers = names.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub(crate) fn direct_error(mut self, err: ProviderError) -> Self {
        self.direct_error = Some(err);
        self
    }

    pub(crate) fn hang_search(mut self) -> Self {
        self.hang_search = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub(crate) fn result(id: &str, title: &str, media_type: MediaType, date: Option<&str>) -> SearchResult {
    SearchResult {
        id: id.to_string(),
        title: title.to_string(),
        media_type: Some(media_type),
        release_date: date.map(str::to_string),
        season_count: None,
        catalog_id: None,
    }
}

#[async_trait]
impl ProviderApi for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn search(
        &self,
        _query: &str,
        page: u32,
        _media_type: MediaType,
    ) -> Result<SearchPage, ProviderError> {
        self.record(format!("search:{page}"));
        if self.hang_search {
            futures::future::pending::<()>().await;
        }
        Ok(self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_else(|| SearchPage::empty(page)))
    }

    async fn details(&self, id: &str, _media_type: MediaType) -> Result<MediaDetails, ProviderError> {
        self.record(format!("details:{id}"));
        self.details
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::Http {
                status: 404,
                message: id.to_string(),
            })
    }

    async fn servers(
        &self,
        _id: &str,
        _episode: Option<&Episode>,
    ) -> Result<Vec<String>, ProviderError> {
        Ok(self.servers.clone())
    }

    async fn links(
        &self,
        id: &str,
        episode: Option<&Episode>,
        server: Option<&str>,
        sink: &LinkSink,
    ) -> Result<(), ProviderError> {
        let label = server.unwrap_or("direct");
        self.record(format!("links:{label}"));
        if server.is_none() {
            if let Some(err) = &self.direct_error {
                return Err(err.clone());
            }
        }
        if server.is_some_and(|s| self.failing_servers.contains(s)) {
            return Err(ProviderError::Http {
                status: 503,
                message: format!("{label} down"),
            });
        }

        let suffix = episode.map(ToString::to_string).unwrap_or_default();
        sink.stream(Stream::new(
            format!("https://{}.example/{id}{suffix}/{label}.m3u8", self.id),
            label,
        ))
        .await?;
        sink.subtitle(Subtitle::new(
            format!("https://{}.example/{id}{suffix}/en.vtt", self.id),
            "en",
        ))
        .await
    }
}

struct Hosted {
    manifest: BundleManifest,
    api: Arc<ScriptedProvider>,
}

#[async_trait]
impl ProviderInstance for Hosted {
    fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    async fn create_api(&self) -> Result<Arc<dyn ProviderApi>, ProviderError> {
        Ok(Arc::clone(&self.api) as Arc<dyn ProviderApi>)
    }
}

/// A registry with every provider in `providers` loaded and enabled, in order.
///
/// Bundles live under the returned temp dir, which must outlive the registry.
pub(crate) async fn registry_with(
    providers: &[Arc<ScriptedProvider>],
) -> (tempfile::TempDir, Arc<ProviderRegistry>) {
    let dir = tempfile::tempdir().unwrap();
    let mut loader = BuiltinLoader::new();
    for provider in providers {
        let api = Arc::clone(provider);
        loader = loader.with_factory(&provider.id, move |manifest| {
            Ok(Box::new(Hosted {
                manifest,
                api: Arc::clone(&api),
            }))
        });
    }

    let registry = Arc::new(ProviderRegistry::new(
        Arc::new(loader),
        Arc::new(ProviderApiRegistry::new()),
        ProviderPreferences::in_memory(),
    ));
    for provider in providers {
        let bundle = dir.path().join(&provider.id);
        BundleManifest {
            entry_point: provider.id.clone(),
            name: provider.id.clone(),
            version: "1.0.0".into(),
            requires_resources: false,
        }
        .write(&bundle)
        .unwrap();
        registry
            .load(&bundle, ProviderMetadata::new(&provider.id, &provider.id, "1.0.0"))
            .await
            .unwrap();
    }
    (dir, registry)
}
