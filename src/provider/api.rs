//! The capability surface a loaded provider exposes to the resolver pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::{Episode, LinkItem, MediaDetails, MediaType, SearchPage, Stream, Subtitle};

/// Failures a single provider call can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to decrypt stream manifest: {0}")]
    Decryption(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider crashed: {0}")]
    Crashed(String),

    #[error("not supported by this provider: {0}")]
    Unsupported(String),

    #[error("link receiver closed")]
    Closed,
}

impl ProviderError {
    /// Network-level failures: timeouts, DNS, HTTP status errors.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http { .. } | Self::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}

/// Producer half of the incremental link channel handed to providers.
///
/// Providers push streams and subtitles as each of their servers answers,
/// so the consumer never waits for the slowest server.
#[derive(Debug, Clone)]
pub struct LinkSink {
    tx: mpsc::Sender<LinkItem>,
    streams: Arc<AtomicUsize>,
}

impl LinkSink {
    pub fn new(tx: mpsc::Sender<LinkItem>) -> Self {
        Self {
            tx,
            streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a sink together with its receiving end.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<LinkItem>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub async fn stream(&self, stream: Stream) -> Result<(), ProviderError> {
        self.tx
            .send(LinkItem::Stream(stream))
            .await
            .map_err(|_| ProviderError::Closed)?;
        self.streams.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn subtitle(&self, subtitle: Subtitle) -> Result<(), ProviderError> {
        self.tx
            .send(LinkItem::Subtitle(subtitle))
            .await
            .map_err(|_| ProviderError::Closed)
    }

    /// Number of streams successfully pushed through this sink and its clones.
    pub fn streams_sent(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }
}

/// A live API handle derived from a loaded provider.
///
/// Implementors talk to one upstream catalog/streaming source and return
/// normalized [`SearchPage`] / [`MediaDetails`] and links.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Id of the provider this handle belongs to.
    fn id(&self) -> &str;

    /// Search the provider's catalog. Pages are 1-based.
    async fn search(
        &self,
        query: &str,
        page: u32,
        media_type: MediaType,
    ) -> Result<SearchPage, ProviderError>;

    /// Fetch details for a provider-internal identifier.
    async fn details(&self, id: &str, media_type: MediaType)
        -> Result<MediaDetails, ProviderError>;

    /// Named servers the links for `id` can be fetched from.
    ///
    /// An empty list means the provider resolves links directly.
    async fn servers(
        &self,
        id: &str,
        episode: Option<&Episode>,
    ) -> Result<Vec<String>, ProviderError> {
        let _ = (id, episode);
        Ok(Vec::new())
    }

    /// Push every stream and subtitle found for `id` into `sink`.
    ///
    /// `server` is `None` for direct resolution, or one of the names
    /// returned by [`ProviderApi::servers`].
    async fn links(
        &self,
        id: &str,
        episode: Option<&Episode>,
        server: Option<&str>,
        sink: &LinkSink,
    ) -> Result<(), ProviderError>;
}
