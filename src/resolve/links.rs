//! Fetch playable links for a provider-internal id.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{cancellable, ResolutionError};
use crate::provider::{Episode, LinkSink, ProviderApi, ProviderError};

/// How a successful link fetch went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Server that produced the links, `None` when the provider has no servers.
    pub server: Option<String>,
    pub attempts: usize,
}

/// Sweeps a provider's servers until one emits at least one stream.
///
/// Attempts are strictly sequential: start at the preferred server (or the
/// first), then continue in list order, wrapping around, until every server
/// was tried once.
#[derive(Debug, Clone, Default)]
pub struct LinkResolver;

impl LinkResolver {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, api, sink, cancel), fields(provider = %api.id()))]
    pub async fn resolve(
        &self,
        api: &dyn ProviderApi,
        media_id: &str,
        episode: Option<&Episode>,
        preferred_server: Option<&str>,
        sink: &LinkSink,
        cancel: &CancellationToken,
    ) -> Result<LinkOutcome, ResolutionError> {
        let servers = cancellable(cancel, api.servers(media_id, episode)).await??;

        if servers.is_empty() {
            debug!("Provider lists no servers, fetching directly");
            let before = sink.streams_sent();
            cancellable(cancel, api.links(media_id, episode, None, sink)).await??;
            if sink.streams_sent() == before {
                return Err(ResolutionError::NoLinks);
            }
            return Ok(LinkOutcome {
                server: None,
                attempts: 1,
            });
        }

        let start = preferred_server
            .and_then(|name| servers.iter().position(|s| s.eq_ignore_ascii_case(name)))
            .unwrap_or(0);

        for attempt in 0..servers.len() {
            let server = &servers[(start + attempt) % servers.len()];
            let before = sink.streams_sent();
            let result =
                cancellable(cancel, api.links(media_id, episode, Some(server), sink)).await?;
            let produced = sink.streams_sent() > before;

            match result {
                Ok(()) if produced => {
                    info!(server = %server, attempts = attempt + 1, "Links resolved");
                    return Ok(LinkOutcome {
                        server: Some(server.clone()),
                        attempts: attempt + 1,
                    });
                }
                Ok(()) => warn!(server = %server, "Server returned no streams"),
                Err(ProviderError::Closed) => return Err(ResolutionError::Cancelled),
                Err(e) if produced => {
                    warn!(server = %server, error = %e, "Server failed after emitting streams, keeping them");
                    return Ok(LinkOutcome {
                        server: Some(server.clone()),
                        attempts: attempt + 1,
                    });
                }
                Err(e) => warn!(server = %server, error = %e, "Server failed, trying next"),
            }
        }

        Err(ResolutionError::NoServersAvailable {
            attempts: servers.len(),
        })
    }
}
