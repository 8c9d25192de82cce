//! Provider capabilities and the data they exchange with the host.
//!
//! A provider searches one upstream catalog, maps titles to its own
//! identifiers, and resolves those identifiers to playable [`Stream`]s and
//! [`Subtitle`]s. The host only ever sees providers through [`ProviderApi`].

pub mod api;
pub mod types;

#[cfg(test)]
pub(crate) mod scripted;

pub use api::{LinkSink, ProviderApi, ProviderError};
pub use types::{
    Episode, Film, LinkItem, MediaDetails, MediaType, ProviderMetadata, SearchPage, SearchResult,
    Stream, Subtitle, SubtitleSource,
};
