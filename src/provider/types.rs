//! Data types shared by providers, the resolver pipeline and the cache.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of title a provider catalog entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    #[serde(alias = "tv_show", alias = "show")]
    Tv,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie => f.write_str("movie"),
            Self::Tv => f.write_str("tv"),
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "movie" | "film" => Ok(Self::Movie),
            "tv" | "show" | "series" => Ok(Self::Tv),
            other => Err(format!("unknown media type '{other}'")),
        }
    }
}

/// Immutable descriptor of an installable provider, as listed in the
/// remote updater list. Two descriptors are the same provider iff their ids match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Where the compiled bundle artifact can be downloaded.
    #[serde(default, alias = "buildUrl")]
    pub build_url: Option<String>,
    #[serde(default, alias = "repositoryUrl")]
    pub repository_url: Option<String>,
    /// Host capabilities the provider needs (e.g. `"webview"`).
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl ProviderMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            build_url: None,
            repository_url: None,
            capabilities: BTreeSet::new(),
        }
    }
}

impl PartialEq for ProviderMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProviderMetadata {}

/// The title being resolved, as known to the host's metadata catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Film {
    /// Canonical id in the host catalog. Part of every cache key.
    pub id: String,
    pub title: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub season_count: Option<u32>,
    /// Upstream catalog id providers may echo back for direct matching.
    #[serde(default)]
    pub catalog_id: Option<String>,
}

/// A single episode of a TV film.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Episode {
    pub season: u32,
    pub number: u32,
}

impl Episode {
    pub fn new(season: u32, number: u32) -> Self {
        Self { season, number }
    }

    /// The episode following this one in the same season.
    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            season: self.season,
            number: self.number + 1,
        }
    }
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}E{:02}", self.season, self.number)
    }
}

/// One entry of a provider's search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Provider-internal identifier.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub season_count: Option<u32>,
    #[serde(default)]
    pub catalog_id: Option<String>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

fn first_page() -> u32 {
    1
}

impl SearchPage {
    pub fn empty(page: u32) -> Self {
        Self {
            results: Vec::new(),
            page,
            has_next_page: false,
            total_pages: Some(page.saturating_sub(1)),
        }
    }
}

/// Details a provider returns for one of its own identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDetails {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub season_count: Option<u32>,
}

/// A resolved, playable media URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub url: String,
    /// Quality or server label, e.g. `"1080p"` or `"Server B"`.
    pub label: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Stream {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
            headers: HashMap::new(),
        }
    }
}

/// Where a subtitle track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleSource {
    /// Delivered by the provider alongside its streams.
    #[default]
    Online,
    /// Muxed inside the stream itself.
    Embedded,
    /// Added later from outside the provider (e.g. user-picked file).
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtitle {
    /// URL of the track, or an embedded-track marker.
    pub url: String,
    pub language: String,
    #[serde(default)]
    pub source: SubtitleSource,
}

impl Subtitle {
    pub fn new(url: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            language: language.into(),
            source: SubtitleSource::Online,
        }
    }
}

/// An item discovered while a provider resolves links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkItem {
    Stream(Stream),
    Subtitle(Subtitle),
}
