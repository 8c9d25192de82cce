//! `reelsource` CLI - manage provider plugins and resolve playable links

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use reelsource::{Config, MediaType};

#[derive(Parser)]
#[command(name = "reelsource")]
#[command(about = "Provider plugin host and streaming link resolver")]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by `RUST_LOG`)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.config/reelsource/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage installed providers
    Providers {
        #[command(subcommand)]
        action: ProviderAction,
    },

    /// Resolve playable links for a title
    Resolve {
        /// Title as it appears in the catalog
        title: String,

        /// Movie or TV show
        #[arg(short = 't', long = "type", value_enum, default_value = "movie")]
        media_type: TypeArg,

        /// Release date, e.g. 1999-10-15
        #[arg(long)]
        release_date: Option<String>,

        /// Number of seasons (shows only)
        #[arg(long)]
        seasons: Option<u32>,

        /// Upstream catalog id used for direct matches
        #[arg(long)]
        catalog_id: Option<String>,

        /// Season number (requires --episode)
        #[arg(short, long, requires = "episode")]
        season: Option<u32>,

        /// Episode number (requires --season)
        #[arg(short, long, requires = "season")]
        episode: Option<u32>,

        /// Only try this provider
        #[arg(short, long)]
        provider: Option<String>,

        /// Preferred server name
        #[arg(long)]
        server: Option<String>,

        /// Print the resolved links as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProviderAction {
    /// List loaded providers in priority order
    List,

    /// Install a provider from the catalog, or register a local bundle
    Install {
        /// Provider id
        id: String,

        /// Use this bundle directory instead of downloading
        #[arg(long)]
        bundle: Option<PathBuf>,
    },

    /// Uninstall a provider and delete its bundle
    Remove {
        /// Provider id
        id: String,
    },

    /// Enable a provider
    Enable {
        /// Provider id
        id: String,
    },

    /// Disable a provider without uninstalling it
    Disable {
        /// Provider id
        id: String,
    },

    /// Swap the providers at two positions (0-based, as shown by `list`)
    Move {
        from: usize,
        to: usize,
    },

    /// Check the catalog for newer provider versions
    Updates,
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    Movie,
    Tv,
}

impl From<TypeArg> for MediaType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::Movie => MediaType::Movie,
            TypeArg::Tv => MediaType::Tv,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Providers { action } => match action {
            ProviderAction::List => cmd::providers::cmd_list(&config).await?,
            ProviderAction::Install { id, bundle } => {
                cmd::providers::cmd_install(&config, &id, bundle.as_deref()).await?;
            }
            ProviderAction::Remove { id } => cmd::providers::cmd_remove(&config, &id).await?,
            ProviderAction::Enable { id } => {
                cmd::providers::cmd_set_enabled(&config, &id, true).await?;
            }
            ProviderAction::Disable { id } => {
                cmd::providers::cmd_set_enabled(&config, &id, false).await?;
            }
            ProviderAction::Move { from, to } => {
                cmd::providers::cmd_move(&config, from, to).await?;
            }
            ProviderAction::Updates => cmd::providers::cmd_updates(&config).await?,
        },
        Commands::Resolve {
            title,
            media_type,
            release_date,
            seasons,
            catalog_id,
            season,
            episode,
            provider,
            server,
            json,
        } => {
            let args = cmd::resolve::ResolveArgs {
                title,
                media_type: media_type.into(),
                release_date,
                seasons,
                catalog_id,
                episode: season.zip(episode),
                provider,
                server,
                json,
            };
            cmd::resolve::cmd_resolve(&config, args).await?;
        }
    }

    Ok(())
}
