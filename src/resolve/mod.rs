//! Media-link resolution pipeline.
//!
//! - [`MediaIdResolver`] maps a title to a provider-internal id via paginated search
//! - [`LinkResolver`] fetches streams and subtitles for that id, sweeping
//!   through the provider's servers on failure
//! - [`ResolutionOrchestrator`] ties both to the [`LinksCache`](crate::cache::LinksCache)
//!   and guarantees one foreground resolution per session

pub mod links;
pub mod matcher;
pub mod orchestrator;

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::provider::ProviderError;

pub use links::{LinkOutcome, LinkResolver};
pub use matcher::{MatchOutcome, MediaIdResolver};
pub use orchestrator::{
    LoadingStage, ResolutionHandle, ResolutionOrchestrator, ResolutionState, ResolveRequest,
};

/// Why a resolution request failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no match for '{title}' on provider '{provider}'")]
    NoMatch { provider: String, title: String },

    #[error("all {attempts} servers failed")]
    NoServersAvailable { attempts: usize },

    #[error("provider returned no playable links")]
    NoLinks,

    #[error("failed to decrypt stream: {0}")]
    Decryption(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Transport(String),

    #[error("provider failed: {0}")]
    Provider(String),

    #[error("provider '{0}' is not available")]
    ProviderUnavailable(String),

    #[error("no enabled providers")]
    NoProviders,

    #[error("a resolution is already in progress")]
    Busy,

    #[error("resolution cancelled")]
    Cancelled,
}

/// User-facing grouping of [`ResolutionError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    TryAnotherProvider,
    CheckConnection,
    ProviderBroken,
    NoProviders,
    Busy,
    Cancelled,
}

impl ErrorCategory {
    pub fn message(self) -> &'static str {
        match self {
            Self::TryAnotherProvider => "This title isn't available here. Try another provider.",
            Self::CheckConnection => "Couldn't reach the provider. Check your connection.",
            Self::ProviderBroken => "The provider sent something unusable. Try another provider or update it.",
            Self::NoProviders => "No providers are enabled. Install or enable one first.",
            Self::Busy => "Already loading, please wait.",
            Self::Cancelled => "Cancelled.",
        }
    }
}

impl ResolutionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoMatch { .. }
            | Self::NoServersAvailable { .. }
            | Self::NoLinks
            | Self::ProviderUnavailable(_) => ErrorCategory::TryAnotherProvider,
            Self::Transport(_) => ErrorCategory::CheckConnection,
            Self::Decryption(_) | Self::MalformedResponse(_) | Self::Provider(_) => {
                ErrorCategory::ProviderBroken
            }
            Self::NoProviders => ErrorCategory::NoProviders,
            Self::Busy => ErrorCategory::Busy,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether another provider might still succeed.
    pub fn is_provider_specific(&self) -> bool {
        !matches!(self, Self::Busy | Self::Cancelled | Self::NoProviders)
    }
}

impl From<ProviderError> for ResolutionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transport(msg) => Self::Transport(msg),
            e @ (ProviderError::Http { .. } | ProviderError::Timeout(_)) => Self::Transport(e.to_string()),
            ProviderError::Decryption(msg) => Self::Decryption(msg),
            ProviderError::MalformedResponse(msg) => Self::MalformedResponse(msg),
            ProviderError::Closed => Self::Cancelled,
            e @ (ProviderError::Crashed(_) | ProviderError::Unsupported(_)) => {
                Self::Provider(e.to_string())
            }
        }
    }
}

/// Run `fut` unless `token` fires first.
pub(crate) async fn cancellable<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output, ResolutionError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(ResolutionError::Cancelled),
        out = fut => Ok(out),
    }
}
