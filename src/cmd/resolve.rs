use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::StreamExt;

use reelsource::resolve::matcher::MediaIdResolver;
use reelsource::resolve::{LoadingStage, ResolutionState};
use reelsource::{
    CachedLinks, Config, Episode, Film, LinksCache, MediaType, ResolutionOrchestrator,
    ResolveRequest,
};

use super::open_registry;

pub struct ResolveArgs {
    pub title: String,
    pub media_type: MediaType,
    pub release_date: Option<String>,
    pub seasons: Option<u32>,
    pub catalog_id: Option<String>,
    /// (season, episode)
    pub episode: Option<(u32, u32)>,
    pub provider: Option<String>,
    pub server: Option<String>,
    pub json: bool,
}

pub async fn cmd_resolve(config: &Config, args: ResolveArgs) -> Result<()> {
    let registry = open_registry(config).await?;
    let orchestrator = ResolutionOrchestrator::with_matcher(
        registry,
        Arc::new(LinksCache::new()),
        MediaIdResolver::new(config.max_search_pages),
    );

    let film = Film {
        id: args
            .catalog_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", args.media_type, args.title.to_lowercase())),
        title: args.title,
        media_type: args.media_type,
        release_date: args.release_date,
        season_count: args.seasons,
        catalog_id: args.catalog_id,
    };
    let mut request = ResolveRequest::new(film);
    if let Some((season, number)) = args.episode {
        request = request.episode(Episode::new(season, number));
    }
    if let Some(provider) = args.provider {
        request = request.provider(provider);
    }
    if let Some(server) = args.server {
        request = request.server(server);
    }

    let handle = orchestrator.resolve(request).await?;
    let mut states = handle.states();
    let state = loop {
        tokio::select! {
            next = states.next() => match next {
                Some(state) if state.is_terminal() => break state,
                Some(state) => {
                    if !args.json {
                        print_progress(&state);
                    }
                }
                None => break handle.state(),
            },
            Ok(()) = tokio::signal::ctrl_c() => {
                handle.cancel();
            }
        }
    };

    match state {
        ResolutionState::Success(links) if args.json => {
            println!("{}", serde_json::to_string_pretty(&links)?);
            Ok(())
        }
        ResolutionState::Success(links) => {
            print_links(&links);
            Ok(())
        }
        ResolutionState::Failure(err) => {
            eprintln!("❌ {err}");
            eprintln!("   {}", err.category().message());
            Err(anyhow!(err))
        }
        ResolutionState::Idle | ResolutionState::Loading(_) => Err(anyhow!("resolution ended early")),
    }
}

fn print_progress(state: &ResolutionState) {
    match state {
        ResolutionState::Loading(LoadingStage::Searching { provider }) => {
            println!("🔍 Searching {provider}...");
        }
        ResolutionState::Loading(LoadingStage::FetchingLinks { provider, streams: 0 }) => {
            println!("🔗 Fetching links from {provider}...");
        }
        _ => {}
    }
}

fn print_links(links: &CachedLinks) {
    println!("\n✅ {} streams from {} (id {})", links.streams.len(), links.provider_id, links.watch_id);
    for stream in &links.streams {
        println!("   [{}] {}", stream.label, stream.url);
    }
    if !links.subtitles.is_empty() {
        println!("\n💬 Subtitles:");
        for subtitle in &links.subtitles {
            println!("   [{}] {}", subtitle.language, subtitle.url);
        }
    }
}
