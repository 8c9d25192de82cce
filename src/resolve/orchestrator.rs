//! One "resolve and play" request, end to end.
//!
//! The orchestrator runs at most one foreground resolution at a time. A
//! second foreground request while one is active is refused with
//! [`ResolutionError::Busy`]. Next to it there may be one speculative
//! resolution (typically the next episode) that is cancelled, and awaited,
//! before any foreground resolution starts.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::links::LinkResolver;
use super::matcher::{MatchOutcome, MediaIdResolver};
use super::ResolutionError;
use crate::cache::{CacheKey, CachedLinks, LinksCache};
use crate::plugin::ProviderRegistry;
use crate::provider::{Episode, Film, LinkItem, LinkSink, ProviderApi};

const LINK_BUFFER: usize = 32;

/// What to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub film: Film,
    pub episode: Option<Episode>,
    /// Restrict resolution to this provider. Without it, enabled providers
    /// are tried in registry order.
    pub provider_id: Option<String>,
    pub server: Option<String>,
}

impl ResolveRequest {
    pub fn new(film: Film) -> Self {
        Self {
            film,
            episode: None,
            provider_id: None,
            server: None,
        }
    }

    #[must_use]
    pub fn episode(mut self, episode: Episode) -> Self {
        self.episode = Some(episode);
        self
    }

    #[must_use]
    pub fn provider(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn server(mut self, name: impl Into<String>) -> Self {
        self.server = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadingStage {
    Searching { provider: String },
    FetchingLinks { provider: String, streams: usize },
}

/// Observable progress of one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    Idle,
    Loading(LoadingStage),
    Success(CachedLinks),
    Failure(ResolutionError),
}

impl ResolutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Failure(_))
    }

    fn outcome(&self) -> Option<Result<CachedLinks, ResolutionError>> {
        match self {
            Self::Success(links) => Some(Ok(links.clone())),
            Self::Failure(err) => Some(Err(err.clone())),
            Self::Idle | Self::Loading(_) => None,
        }
    }
}

/// Caller's view of a running resolution.
#[derive(Debug, Clone)]
pub struct ResolutionHandle {
    id: Uuid,
    state: watch::Receiver<ResolutionState>,
    token: CancellationToken,
}

impl ResolutionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ResolutionState {
        self.state.borrow().clone()
    }

    /// Current state, then every transition.
    pub fn states(&self) -> WatchStream<ResolutionState> {
        WatchStream::new(self.state.clone())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the terminal state.
    pub async fn wait(mut self) -> Result<CachedLinks, ResolutionError> {
        loop {
            if let Some(outcome) = self.state.borrow_and_update().outcome() {
                return outcome;
            }
            if self.state.changed().await.is_err() {
                return self
                    .state
                    .borrow()
                    .outcome()
                    .unwrap_or(Err(ResolutionError::Cancelled));
            }
        }
    }
}

struct TaskSlot {
    token: CancellationToken,
    state: watch::Receiver<ResolutionState>,
    handle: JoinHandle<()>,
}

impl TaskSlot {
    fn is_active(&self) -> bool {
        !self.state.borrow().is_terminal()
    }

    async fn cancel_and_join(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Resolution task did not shut down cleanly");
        }
    }
}

struct Inner {
    registry: Arc<ProviderRegistry>,
    cache: Arc<LinksCache>,
    matcher: MediaIdResolver,
    links: LinkResolver,
    /// Provider-internal id per (film id, provider id).
    media_ids: DashMap<(String, String), String>,
}

pub struct ResolutionOrchestrator {
    inner: Arc<Inner>,
    foreground: Mutex<Option<TaskSlot>>,
    speculative: Mutex<Option<TaskSlot>>,
}

impl ResolutionOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, cache: Arc<LinksCache>) -> Self {
        Self::with_matcher(registry, cache, MediaIdResolver::default())
    }

    pub fn with_matcher(
        registry: Arc<ProviderRegistry>,
        cache: Arc<LinksCache>,
        matcher: MediaIdResolver,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                cache,
                matcher,
                links: LinkResolver::new(),
                media_ids: DashMap::new(),
            }),
            foreground: Mutex::new(None),
            speculative: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<LinksCache> {
        &self.inner.cache
    }

    /// Start a foreground resolution.
    ///
    /// Any speculative resolution is cancelled and has finished first, even
    /// when the request is then refused with [`ResolutionError::Busy`]
    /// because another foreground resolution is still running.
    #[instrument(skip(self, request), fields(title = %request.film.title, episode = ?request.episode))]
    pub async fn resolve(
        &self,
        request: ResolveRequest,
    ) -> Result<ResolutionHandle, ResolutionError> {
        self.cancel_speculative().await;

        let mut foreground = self.foreground.lock().await;
        if foreground.as_ref().is_some_and(TaskSlot::is_active) {
            debug!("Rejecting resolution, another one is in flight");
            return Err(ResolutionError::Busy);
        }

        let (slot, handle) = self.spawn(request, "foreground");
        *foreground = Some(slot);
        Ok(handle)
    }

    /// Cancel the current foreground resolution, if any, then start `request`.
    ///
    /// Used when the user switches provider or episode mid-resolution.
    pub async fn restart(
        &self,
        request: ResolveRequest,
    ) -> Result<ResolutionHandle, ResolutionError> {
        let previous = self.foreground.lock().await.take();
        if let Some(slot) = previous {
            slot.cancel_and_join().await;
        }
        self.resolve(request).await
    }

    /// Start a low-priority background resolution, replacing any previous
    /// speculative one. Results land in the cache like any other.
    #[instrument(skip(self, request), fields(title = %request.film.title, episode = ?request.episode))]
    pub async fn resolve_speculative(&self, request: ResolveRequest) -> ResolutionHandle {
        let mut speculative = self.speculative.lock().await;
        if let Some(previous) = speculative.take() {
            previous.cancel_and_join().await;
        }
        let (slot, handle) = self.spawn(request, "speculative");
        *speculative = Some(slot);
        handle
    }

    /// Prefetch the episode after `current` in the background.
    ///
    /// Returns `None` for requests without an episode.
    pub async fn resolve_next_episode(&self, current: &ResolveRequest) -> Option<ResolutionHandle> {
        let next = current.episode.as_ref()?.next();
        let request = ResolveRequest {
            episode: Some(next),
            ..current.clone()
        };
        Some(self.resolve_speculative(request).await)
    }

    /// Cancel everything in flight and wait for it to stop.
    pub async fn cancel_all(&self) {
        let previous = self.foreground.lock().await.take();
        if let Some(slot) = previous {
            slot.cancel_and_join().await;
        }
        self.cancel_speculative().await;
    }

    async fn cancel_speculative(&self) {
        let previous = self.speculative.lock().await.take();
        if let Some(slot) = previous {
            if slot.is_active() {
                info!("Cancelling speculative resolution");
            }
            slot.cancel_and_join().await;
        }
    }

    fn spawn(&self, request: ResolveRequest, kind: &'static str) -> (TaskSlot, ResolutionHandle) {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(ResolutionState::Idle);

        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let span = info_span!("resolution", %id, kind, title = %request.film.title);
        let handle = tokio::spawn(
            async move {
                let state = match inner.execute(&request, &tx, &task_token).await {
                    Ok(links) => {
                        info!(provider = %links.provider_id, streams = links.streams.len(), "Resolution succeeded");
                        ResolutionState::Success(links)
                    }
                    Err(e) => {
                        info!(error = %e, "Resolution failed");
                        ResolutionState::Failure(e)
                    }
                };
                tx.send_replace(state);
            }
            .instrument(span),
        );

        let slot = TaskSlot {
            token: token.clone(),
            state: rx.clone(),
            handle,
        };
        (
            slot,
            ResolutionHandle {
                id,
                state: rx,
                token,
            },
        )
    }
}

impl Inner {
    async fn execute(
        &self,
        request: &ResolveRequest,
        state: &watch::Sender<ResolutionState>,
        cancel: &CancellationToken,
    ) -> Result<CachedLinks, ResolutionError> {
        let explicit = request.provider_id.is_some();
        let candidates = match &request.provider_id {
            Some(id) => vec![id.clone()],
            None => self.registry.enabled_ids().await,
        };

        let mut last_error = ResolutionError::NoProviders;
        for provider in candidates {
            if cancel.is_cancelled() {
                return Err(ResolutionError::Cancelled);
            }
            match self.resolve_with(&provider, request, state, cancel).await {
                Ok(links) => return Ok(links),
                Err(e) if !explicit && e.is_provider_specific() => {
                    warn!(provider = %provider, error = %e, "Provider failed, trying next");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    async fn resolve_with(
        &self,
        provider: &str,
        request: &ResolveRequest,
        state: &watch::Sender<ResolutionState>,
        cancel: &CancellationToken,
    ) -> Result<CachedLinks, ResolutionError> {
        let key = CacheKey::new(&request.film.id, request.episode.as_ref(), provider);
        let cached = self.cache.get(&key);
        if cached.is_playable() {
            debug!(key = %key, "Serving links from cache");
            return Ok(cached);
        }

        let api = self
            .registry
            .apis()
            .get(provider)
            .ok_or_else(|| ResolutionError::ProviderUnavailable(provider.to_string()))?;

        state.send_replace(ResolutionState::Loading(LoadingStage::Searching {
            provider: provider.to_string(),
        }));
        let media_id = self.media_id(provider, &request.film, api.as_ref(), cancel).await?;

        state.send_replace(ResolutionState::Loading(LoadingStage::FetchingLinks {
            provider: provider.to_string(),
            streams: 0,
        }));

        let (sink, mut rx) = LinkSink::channel(LINK_BUFFER);
        let fetch = {
            let links = &self.links;
            let api = Arc::clone(&api);
            let media_id = media_id.clone();
            let episode = request.episode.as_ref();
            let server = request.server.as_deref();
            async move {
                links
                    .resolve(api.as_ref(), &media_id, episode, server, &sink, cancel)
                    .await
            }
        };
        let collect = async {
            let mut collected = CachedLinks {
                provider_id: provider.to_string(),
                watch_id: media_id.clone(),
                ..CachedLinks::default()
            };
            while let Some(item) = rx.recv().await {
                match item {
                    LinkItem::Stream(stream) => {
                        collected.streams.push(stream);
                        state.send_replace(ResolutionState::Loading(
                            LoadingStage::FetchingLinks {
                                provider: provider.to_string(),
                                streams: collected.streams.len(),
                            },
                        ));
                    }
                    LinkItem::Subtitle(subtitle) => collected.subtitles.push(subtitle),
                }
            }
            collected
        };

        let (outcome, collected) = tokio::join!(fetch, collect);
        let outcome = outcome?;
        if !collected.is_playable() {
            return Err(ResolutionError::NoLinks);
        }

        debug!(
            provider = %provider,
            server = ?outcome.server,
            attempts = outcome.attempts,
            "Links collected"
        );
        self.cache.put(&key, collected.clone());
        Ok(collected)
    }

    async fn media_id(
        &self,
        provider: &str,
        film: &Film,
        api: &dyn ProviderApi,
        cancel: &CancellationToken,
    ) -> Result<String, ResolutionError> {
        let memo = (film.id.clone(), provider.to_string());
        if let Some(id) = self.media_ids.get(&memo).map(|id| id.clone()) {
            debug!(provider = %provider, id = %id, "Reusing known media id");
            return Ok(id);
        }

        match self.matcher.resolve(film, api, cancel).await? {
            MatchOutcome::Found(id) => {
                self.media_ids.insert(memo, id.clone());
                Ok(id)
            }
            MatchOutcome::Exhausted => Err(ResolutionError::NoMatch {
                provider: provider.to_string(),
                title: film.title.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::scripted::{registry_with, result, ScriptedProvider};
    use crate::provider::{MediaType, Subtitle};

    fn fight_club() -> Film {
        Film {
            id: "tmdb-550".into(),
            title: "Fight Club".into(),
            media_type: MediaType::Movie,
            release_date: Some("1999-10-15".into()),
            season_count: None,
            catalog_id: None,
        }
    }

    fn dark() -> Film {
        Film {
            id: "tmdb-70523".into(),
            title: "Dark".into(),
            media_type: MediaType::Tv,
            release_date: Some("2017-12-01".into()),
            season_count: Some(3),
            catalog_id: None,
        }
    }

    fn hit(film: &Film, id: &str) -> Vec<crate::provider::SearchResult> {
        let mut r = result(id, &film.title, film.media_type, film.release_date.as_deref());
        r.season_count = film.season_count;
        vec![r]
    }

    async fn orchestrator(
        providers: &[Arc<ScriptedProvider>],
    ) -> (tempfile::TempDir, ResolutionOrchestrator) {
        let (dir, registry) = registry_with(providers).await;
        (
            dir,
            ResolutionOrchestrator::new(registry, Arc::new(LinksCache::new())),
        )
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        let film = fight_club();
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&film, "fc")));
        let (_dir, orch) = orchestrator(&[Arc::clone(&flix)]).await;

        let links = orch
            .resolve(ResolveRequest::new(film.clone()))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(links.provider_id, "flix");
        assert_eq!(links.watch_id, "fc");
        assert_eq!(links.streams[0].url, "https://flix.example/fc/direct.m3u8");
        assert_eq!(orch.cache().get(&CacheKey::new(&film.id, None, "flix")), links);
    }

    #[tokio::test]
    async fn cached_links_skip_the_provider() {
        let film = fight_club();
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&film, "fc")));
        let (_dir, orch) = orchestrator(&[Arc::clone(&flix)]).await;
        let key = CacheKey::new(&film.id, None, "flix");
        let cached = CachedLinks {
            provider_id: "flix".into(),
            watch_id: "fc".into(),
            streams: vec![crate::provider::Stream::new("https://cached/1.m3u8", "auto")],
            subtitles: Vec::new(),
        };
        orch.cache().put(&key, cached.clone());

        let handle = orch.resolve(ResolveRequest::new(film)).await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), cached);
        assert!(flix.calls().is_empty());
    }

    #[tokio::test]
    async fn second_foreground_request_is_busy() {
        let film = fight_club();
        let slow = Arc::new(ScriptedProvider::new("slow").hang_search());
        let (_dir, orch) = orchestrator(&[slow]).await;

        let first = orch.resolve(ResolveRequest::new(film.clone())).await.unwrap();
        let second = orch.resolve(ResolveRequest::new(film.clone())).await;
        assert_eq!(second.err(), Some(ResolutionError::Busy));

        first.cancel();
        assert_eq!(first.wait().await, Err(ResolutionError::Cancelled));
        assert!(orch.resolve(ResolveRequest::new(film)).await.is_ok());
        orch.cancel_all().await;
    }

    #[tokio::test]
    async fn busy_request_still_cancels_speculative() {
        let show = dark();
        let slow = Arc::new(ScriptedProvider::new("slow").hang_search());
        let (_dir, orch) = orchestrator(&[slow]).await;
        let current = ResolveRequest::new(show).episode(Episode::new(1, 5));

        let first = orch.resolve(current.clone()).await.unwrap();
        let next = orch.resolve_next_episode(&current).await.unwrap();
        assert!(!next.is_cancelled());

        let second = orch.resolve(current).await;
        assert_eq!(second.err(), Some(ResolutionError::Busy));
        assert!(next.is_cancelled());
        assert_eq!(next.state(), ResolutionState::Failure(ResolutionError::Cancelled));

        first.cancel();
        orch.cancel_all().await;
    }

    #[tokio::test]
    async fn next_episode_prefetch_fills_the_cache() {
        let show = dark();
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&show, "dark")));
        let (_dir, orch) = orchestrator(&[flix]).await;
        let current = ResolveRequest::new(show.clone()).episode(Episode::new(1, 5));

        orch.resolve(current.clone()).await.unwrap().wait().await.unwrap();
        let next = orch.resolve_next_episode(&current).await.unwrap();
        let links = next.wait().await.unwrap();

        assert!(links.streams[0].url.contains("S01E06"));
        let key = CacheKey::new(&show.id, Some(&Episode::new(1, 6)), "flix");
        assert_eq!(orch.cache().get(&key), links);
        assert!(orch
            .resolve_next_episode(&ResolveRequest::new(fight_club()))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn restart_replaces_the_running_resolution() {
        let film = fight_club();
        let slow = Arc::new(ScriptedProvider::new("slow").hang_search());
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&film, "fc")));
        let (_dir, orch) = orchestrator(&[slow, flix]).await;

        let first = orch
            .resolve(ResolveRequest::new(film.clone()).provider("slow"))
            .await
            .unwrap();
        let second = orch
            .restart(ResolveRequest::new(film).provider("flix"))
            .await
            .unwrap();

        assert_eq!(first.state(), ResolutionState::Failure(ResolutionError::Cancelled));
        assert_eq!(second.wait().await.unwrap().provider_id, "flix");
    }

    #[tokio::test]
    async fn foreground_cancels_speculative_before_starting() {
        let show = dark();
        let slow = Arc::new(ScriptedProvider::new("slow").hang_search());
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&show, "dark")));
        let (_dir, orch) = orchestrator(&[slow, Arc::clone(&flix)]).await;

        let next = orch
            .resolve_speculative(
                ResolveRequest::new(show.clone())
                    .episode(Episode::new(1, 6))
                    .provider("slow"),
            )
            .await;
        let current = orch
            .resolve(
                ResolveRequest::new(show)
                    .episode(Episode::new(1, 5))
                    .provider("flix"),
            )
            .await
            .unwrap();

        assert!(next.is_cancelled());
        assert_eq!(next.state(), ResolutionState::Failure(ResolutionError::Cancelled));
        let links = current.wait().await.unwrap();
        assert!(links.streams[0].url.contains("S01E05"));
    }

    #[tokio::test]
    async fn speculative_runs_alongside_foreground() {
        let show = dark();
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&show, "dark")));
        let (_dir, orch) = orchestrator(&[Arc::clone(&flix)]).await;

        let current = orch
            .resolve(ResolveRequest::new(show.clone()).episode(Episode::new(1, 5)))
            .await
            .unwrap();
        let next = orch
            .resolve_speculative(ResolveRequest::new(show.clone()).episode(Episode::new(1, 6)))
            .await;

        current.wait().await.unwrap();
        next.wait().await.unwrap();
        let key = CacheKey::new(&show.id, Some(&Episode::new(1, 6)), "flix");
        assert!(orch.cache().get(&key).is_playable());
    }

    #[tokio::test]
    async fn later_episodes_reuse_the_media_id() {
        let show = dark();
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&show, "dark")));
        let (_dir, orch) = orchestrator(&[Arc::clone(&flix)]).await;

        for number in [1, 2] {
            orch.resolve(ResolveRequest::new(show.clone()).episode(Episode::new(1, number)))
                .await
                .unwrap()
                .wait()
                .await
                .unwrap();
        }
        assert_eq!(flix.count("search:"), 1);
        assert_eq!(flix.count("links:"), 2);
    }

    #[tokio::test]
    async fn falls_back_to_next_enabled_provider() {
        let film = fight_club();
        let empty = Arc::new(ScriptedProvider::new("empty").page(vec![]));
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&film, "fc")));
        let (_dir, orch) = orchestrator(&[Arc::clone(&empty), flix]).await;

        let links = orch
            .resolve(ResolveRequest::new(film))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(links.provider_id, "flix");
        assert_eq!(empty.calls(), ["search:1"]);
    }

    #[tokio::test]
    async fn explicit_provider_does_not_fall_back() {
        let film = fight_club();
        let empty = Arc::new(ScriptedProvider::new("empty").page(vec![]));
        let flix = Arc::new(ScriptedProvider::new("flix").page(hit(&film, "fc")));
        let (_dir, orch) = orchestrator(&[empty, Arc::clone(&flix)]).await;

        let err = orch
            .resolve(ResolveRequest::new(film).provider("empty"))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();

        assert!(matches!(err, ResolutionError::NoMatch { ref provider, .. } if provider == "empty"));
        assert!(flix.calls().is_empty());
    }

    #[tokio::test]
    async fn failure_leaves_cache_untouched() {
        let film = fight_club();
        let broken = Arc::new(
            ScriptedProvider::new("flix")
                .page(hit(&film, "fc"))
                .servers(&["A", "B"])
                .failing(&["A", "B"]),
        );
        let (_dir, orch) = orchestrator(&[broken]).await;
        let key = CacheKey::new(&film.id, None, "flix");
        let subtitle = Subtitle::new("https://local/en.srt", "en");
        orch.cache().add_subtitle(&key, subtitle.clone());

        let err = orch
            .resolve(ResolveRequest::new(film))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();

        assert_eq!(err, ResolutionError::NoServersAvailable { attempts: 2 });
        let cached = orch.cache().get(&key);
        assert_eq!(cached.subtitles, vec![subtitle]);
        assert!(cached.streams.is_empty());
    }

    #[tokio::test]
    async fn unknown_provider_is_unavailable() {
        let (_dir, orch) = orchestrator(&[]).await;
        let err = orch
            .resolve(ResolveRequest::new(fight_club()).provider("ghost"))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err, ResolutionError::ProviderUnavailable("ghost".into()));
    }

    #[tokio::test]
    async fn no_enabled_providers() {
        let (_dir, orch) = orchestrator(&[]).await;
        let err = orch
            .resolve(ResolveRequest::new(fight_club()))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err, ResolutionError::NoProviders);
    }
}
