//! Last successfully resolved links per (film, episode, provider).
//!
//! Every key owns a `watch` channel, so observers always see whole
//! [`CachedLinks`] snapshots: the current value first, then each
//! replacement. Writes are last-writer-wins per key.

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::provider::{Episode, Stream, Subtitle};

/// Identifies one cached resolution. Build it with [`CacheKey::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    film_id: String,
    provider_id: String,
    episode: EpisodeSlot,
}

/// Episode component of a [`CacheKey`]; movies use the [`EpisodeSlot::Movie`] sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EpisodeSlot {
    Movie,
    Episode { season: u32, number: u32 },
}

impl CacheKey {
    pub fn new(film_id: &str, episode: Option<&Episode>, provider_id: &str) -> Self {
        Self {
            film_id: film_id.trim().to_string(),
            provider_id: provider_id.trim().to_string(),
            episode: episode.map_or(EpisodeSlot::Movie, |e| EpisodeSlot::Episode {
                season: e.season,
                number: e.number,
            }),
        }
    }

    pub fn film_id(&self) -> &str {
        &self.film_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn episode(&self) -> &EpisodeSlot {
        &self.episode
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.episode {
            EpisodeSlot::Movie => write!(f, "{}@{}", self.film_id, self.provider_id),
            EpisodeSlot::Episode { season, number } => write!(
                f,
                "{}:S{season:02}E{number:02}@{}",
                self.film_id, self.provider_id
            ),
        }
    }
}

/// A resolved set of links. The default value means "not resolved yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedLinks {
    pub provider_id: String,
    /// Provider-internal id the links were resolved from.
    pub watch_id: String,
    pub streams: Vec<Stream>,
    pub subtitles: Vec<Subtitle>,
}

impl CachedLinks {
    /// `true` for the "not yet resolved" default.
    pub fn is_empty(&self) -> bool {
        self.provider_id.is_empty()
            && self.watch_id.is_empty()
            && self.streams.is_empty()
            && self.subtitles.is_empty()
    }

    /// Has at least one playable stream.
    pub fn is_playable(&self) -> bool {
        !self.streams.is_empty()
    }
}

#[derive(Default)]
pub struct LinksCache {
    entries: DashMap<CacheKey, watch::Sender<CachedLinks>>,
}

impl LinksCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for `key`, or the empty default.
    pub fn get(&self, key: &CacheKey) -> CachedLinks {
        self.entries
            .get(key)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Stream of snapshots for `key`, starting with the current value.
    pub fn observe(&self, key: &CacheKey) -> WatchStream<CachedLinks> {
        WatchStream::new(self.subscribe(key))
    }

    /// Raw receiver for `key`; [`watch::Receiver::borrow`] is the current value.
    pub fn subscribe(&self, key: &CacheKey) -> watch::Receiver<CachedLinks> {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| watch::channel(CachedLinks::default()).0)
            .subscribe()
    }

    pub fn put(&self, key: &CacheKey, value: CachedLinks) {
        debug!(key = %key, streams = value.streams.len(), "Caching links");
        self.entries
            .entry(key.clone())
            .or_insert_with(|| watch::channel(CachedLinks::default()).0)
            .send_replace(value);
    }

    /// Append `subtitle` to the entry for `key`, creating it if absent.
    pub fn add_subtitle(&self, key: &CacheKey, subtitle: Subtitle) {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| watch::channel(CachedLinks::default()).0)
            .send_modify(|links| links.subtitles.push(subtitle));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn links(provider: &str, urls: &[&str]) -> CachedLinks {
        CachedLinks {
            provider_id: provider.into(),
            watch_id: "w1".into(),
            streams: urls.iter().map(|u| Stream::new(*u, "auto")).collect(),
            subtitles: Vec::new(),
        }
    }

    #[test]
    fn key_equality_needs_all_components() {
        let ep = Episode::new(1, 5);
        let key = CacheKey::new("tt1", Some(&ep), "flix");
        assert_eq!(key, CacheKey::new(" tt1 ", Some(&Episode::new(1, 5)), "flix"));
        assert_ne!(key, CacheKey::new("tt1", Some(&Episode::new(1, 6)), "flix"));
        assert_ne!(key, CacheKey::new("tt1", Some(&ep), "other"));
        assert_ne!(key, CacheKey::new("tt1", None, "flix"));
        assert_eq!(CacheKey::new("tt1", None, "flix").episode(), &EpisodeSlot::Movie);
    }

    #[test]
    fn missing_key_is_the_empty_default() {
        let cache = LinksCache::new();
        let value = cache.get(&CacheKey::new("tt1", None, "flix"));
        assert!(value.is_empty());
        assert!(!value.is_playable());
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = LinksCache::new();
        let key = CacheKey::new("tt1", None, "flix");
        let value = links("flix", &["https://a/1.m3u8"]);
        cache.put(&key, value.clone());
        assert_eq!(cache.get(&key), value);
    }

    #[test]
    fn put_is_last_writer_wins() {
        let cache = LinksCache::new();
        let key = CacheKey::new("tt1", None, "flix");
        cache.put(&key, links("flix", &["https://a/1.m3u8"]));
        cache.put(&key, links("flix", &["https://b/2.m3u8"]));
        assert_eq!(cache.get(&key).streams[0].url, "https://b/2.m3u8");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn add_subtitle_on_absent_key_creates_entry() {
        let cache = LinksCache::new();
        let key = CacheKey::new("tt1", None, "flix");
        let sub = Subtitle::new("https://a/en.vtt", "en");
        cache.add_subtitle(&key, sub.clone());

        let value = cache.get(&key);
        assert_eq!(value.subtitles, vec![sub]);
        assert!(value.streams.is_empty());
    }

    #[test]
    fn add_subtitle_appends_to_existing() {
        let cache = LinksCache::new();
        let key = CacheKey::new("tt1", None, "flix");
        let mut value = links("flix", &["https://a/1.m3u8"]);
        value.subtitles.push(Subtitle::new("https://a/fi.vtt", "fi"));
        cache.put(&key, value);
        cache.add_subtitle(&key, Subtitle::new("https://a/en.vtt", "en"));

        let langs: Vec<_> = cache.get(&key).subtitles.into_iter().map(|s| s.language).collect();
        assert_eq!(langs, ["fi", "en"]);
    }

    #[tokio::test]
    async fn observe_yields_current_then_updates() {
        let cache = LinksCache::new();
        let key = CacheKey::new("tt1", Some(&Episode::new(1, 1)), "flix");
        let mut stream = cache.observe(&key);

        assert!(stream.next().await.unwrap().is_empty());

        cache.put(&key, links("flix", &["https://a/1.m3u8"]));
        let update = stream.next().await.unwrap();
        assert_eq!(update.provider_id, "flix");

        cache.add_subtitle(&key, Subtitle::new("https://a/en.vtt", "en"));
        let update = stream.next().await.unwrap();
        assert_eq!(update.subtitles.len(), 1);
        assert_eq!(update.streams.len(), 1);
    }

    #[test]
    fn display_key() {
        let key = CacheKey::new("tt1", Some(&Episode::new(2, 3)), "flix");
        assert_eq!(key.to_string(), "tt1:S02E03@flix");
    }
}
