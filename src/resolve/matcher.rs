//! Find a provider's own identifier for a title.
//!
//! Upstream search engines disagree on title and date formatting, so a
//! candidate is accepted by layered checks rather than exact equality:
//!
//! 1. upstream catalog id equal to the film's (direct match)
//! 2. case-insensitive title + media type, then
//!    - movies: same release year (an undated result only matches an
//!      undated film)
//!    - shows: same season count, or same release year, or, failing both,
//!      the release year from one extra details call
//!
//! The first acceptable candidate in result order wins. Search pages are
//! fetched strictly in order, up to a page cap.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{cancellable, ResolutionError};
use crate::provider::{Film, MediaType, ProviderApi, SearchResult};

pub const DEFAULT_MAX_SEARCH_PAGES: u32 = 3;

static YEAR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(1[89]\d{2}|2[01]\d{2})\b").ok());

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"];

/// Terminal result of an id search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Found(String),
    /// Every allowed page was searched without an acceptable candidate.
    Exhausted,
}

/// Verdict of the cheap, offline checks for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Accept,
    /// Title and type match but only a details lookup can settle it.
    NeedsDetails,
    Reject,
}

#[derive(Debug, Clone)]
pub struct MediaIdResolver {
    max_pages: u32,
}

impl Default for MediaIdResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SEARCH_PAGES)
    }
}

impl MediaIdResolver {
    pub fn new(max_pages: u32) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Search `api` for `film`, page by page.
    ///
    /// Transport and provider failures abort the search as errors; an
    /// unsuccessful but complete search is [`MatchOutcome::Exhausted`].
    #[instrument(skip(self, film, api, cancel), fields(provider = %api.id(), title = %film.title))]
    pub async fn resolve(
        &self,
        film: &Film,
        api: &dyn ProviderApi,
        cancel: &CancellationToken,
    ) -> Result<MatchOutcome, ResolutionError> {
        let mut page = 1;
        loop {
            if page > self.max_pages {
                debug!(page, "Page cap reached");
                return Ok(MatchOutcome::Exhausted);
            }

            let response = cancellable(cancel, api.search(&film.title, page, film.media_type)).await??;
            if response.results.is_empty() {
                debug!(page, "Empty search page");
                return Ok(MatchOutcome::Exhausted);
            }

            if let Some(id) = self.scan_page(film, &response.results, api, cancel).await? {
                debug!(page, id = %id, "Matched");
                return Ok(MatchOutcome::Found(id));
            }

            let has_more = response.has_next_page
                || response.total_pages.is_some_and(|total| page < total);
            if !has_more {
                return Ok(MatchOutcome::Exhausted);
            }
            page += 1;
        }
    }

    async fn scan_page(
        &self,
        film: &Film,
        results: &[SearchResult],
        api: &dyn ProviderApi,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ResolutionError> {
        if let Some(direct) = direct_match(film, results) {
            return Ok(Some(direct.id.clone()));
        }

        for result in results {
            match evaluate(film, result) {
                Candidate::Accept => return Ok(Some(result.id.clone())),
                Candidate::Reject => {}
                Candidate::NeedsDetails => {
                    let details =
                        match cancellable(cancel, api.details(&result.id, film.media_type)).await? {
                            Ok(details) => details,
                            Err(e) => {
                                warn!(id = %result.id, error = %e, "Details lookup failed, skipping candidate");
                                continue;
                            }
                        };
                    if same_year(film.release_date.as_deref(), details.release_date.as_deref())
                        == Some(true)
                    {
                        return Ok(Some(result.id.clone()));
                    }
                }
            }
        }
        Ok(None)
    }
}

/// The first result carrying the film's upstream catalog id.
pub fn direct_match<'a>(film: &Film, results: &'a [SearchResult]) -> Option<&'a SearchResult> {
    let target = film.catalog_id.as_deref()?;
    results
        .iter()
        .find(|r| r.catalog_id.as_deref() == Some(target))
}

/// Apply the offline checks to one candidate.
pub fn evaluate(film: &Film, result: &SearchResult) -> Candidate {
    let type_matches = result.media_type.is_none_or(|t| t == film.media_type);
    if !type_matches || normalize_title(&result.title) != normalize_title(&film.title) {
        return Candidate::Reject;
    }

    let years = same_year(film.release_date.as_deref(), result.release_date.as_deref());
    match film.media_type {
        MediaType::Movie => match years {
            Some(true) => Candidate::Accept,
            None if film.release_date.is_none() => Candidate::Accept,
            Some(false) | None => Candidate::Reject,
        },
        MediaType::Tv => {
            let seasons = film.season_count.zip(result.season_count).map(|(a, b)| a == b);
            if seasons == Some(true) || years == Some(true) {
                Candidate::Accept
            } else if film.release_date.is_some() {
                Candidate::NeedsDetails
            } else if seasons == Some(false) {
                Candidate::Reject
            } else {
                Candidate::Accept
            }
        }
    }
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Release year of a loosely formatted date ("1999-10-15", "October 15, 1999", "1999").
pub fn release_year(date: &str) -> Option<i32> {
    let date = date.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())
        .map(|d| d.year())
        .or_else(|| {
            YEAR.as_ref()?
                .captures_iter(date)
                .last()
                .and_then(|c| c[1].parse().ok())
        })
}

/// `None` when either side has no recognizable year.
fn same_year(a: Option<&str>, b: Option<&str>) -> Option<bool> {
    let a = release_year(a?)?;
    let b = release_year(b?)?;
    Some(a == b)
}
