use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use reelsource::plugin::{updater, BundleManifest, UnloadError};
use reelsource::{Config, ProviderMetadata};

use super::open_registry;

pub async fn cmd_list(config: &Config) -> Result<()> {
    let registry = open_registry(config).await?;
    let entries = registry.entries().await;
    if entries.is_empty() {
        println!("No providers installed");
        return Ok(());
    }

    println!("📦 Providers ({}):", entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let status = if entry.enabled { "✅" } else { "⏸️ " };
        println!(
            "   {index}. {status} {} ({}) v{}",
            entry.metadata.name, entry.metadata.id, entry.metadata.version
        );
        println!("      {}", entry.bundle.display());
    }
    Ok(())
}

pub async fn cmd_install(config: &Config, id: &str, bundle: Option<&Path>) -> Result<()> {
    let registry = open_registry(config).await?;
    if registry.get(id).await.is_some() {
        bail!("provider '{id}' is already installed");
    }

    let (bundle, metadata) = match bundle {
        Some(dir) => {
            let manifest = BundleManifest::read(dir)?;
            let metadata = ProviderMetadata::new(id, manifest.name, manifest.version);
            (dir.to_path_buf(), metadata)
        }
        None => {
            let url = config
                .catalog_url
                .as_deref()
                .ok_or_else(|| anyhow!("no catalog_url configured"))?;
            let client = updater::http_client(config.request_timeout())?;
            let catalog = updater::fetch_catalog(&client, url).await?;
            let metadata = catalog
                .into_iter()
                .find(|m| m.id == id)
                .ok_or_else(|| anyhow!("provider '{id}' not found in catalog"))?;
            let bundle = updater::install(&client, &metadata, &config.providers_dir).await?;
            (bundle, metadata)
        }
    };

    println!("📥 Installing {} v{}", metadata.name, metadata.version);
    registry
        .load(&bundle, metadata)
        .await
        .with_context(|| format!("failed to load {}", bundle.display()))?;
    match registry.get(id).await {
        Some(entry) if !entry.enabled => {
            println!("⚠️  Installed {id}, but it failed to start and was disabled");
        }
        _ => println!("✅ Installed {id}"),
    }
    Ok(())
}

pub async fn cmd_remove(config: &Config, id: &str) -> Result<()> {
    let registry = open_registry(config).await?;
    match registry.unload(id).await {
        Ok(()) => println!("🗑️  Removed {id}"),
        Err(e @ UnloadError::TeardownFailed { .. }) => {
            println!("🗑️  Removed {id}");
            println!("⚠️  {e}");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn cmd_set_enabled(config: &Config, id: &str, enabled: bool) -> Result<()> {
    let registry = open_registry(config).await?;
    registry.set_enabled(id, enabled).await?;
    println!("{} {id}", if enabled { "✅ Enabled" } else { "⏸️  Disabled" });
    Ok(())
}

pub async fn cmd_move(config: &Config, from: usize, to: usize) -> Result<()> {
    let registry = open_registry(config).await?;
    let len = registry.len().await;
    if from >= len || to >= len {
        bail!("positions must be below {len}");
    }
    registry.reorder(from, to).await;

    for (index, id) in registry
        .entries()
        .await
        .iter()
        .map(|e| &e.metadata.id)
        .enumerate()
    {
        println!("   {index}. {id}");
    }
    Ok(())
}

pub async fn cmd_updates(config: &Config) -> Result<()> {
    let url = config
        .catalog_url
        .as_deref()
        .ok_or_else(|| anyhow!("no catalog_url configured"))?;
    let registry = open_registry(config).await?;
    let installed: Vec<_> = registry
        .entries()
        .await
        .into_iter()
        .map(|e| e.metadata)
        .collect();

    let client = updater::http_client(config.request_timeout())?;
    let catalog = updater::fetch_catalog(&client, url).await?;
    let updates = updater::find_updates(&catalog, &installed);

    if updates.is_empty() {
        println!("✅ All {} providers are up to date", installed.len());
        return Ok(());
    }
    println!("🔄 Updates available:");
    for update in &updates {
        println!(
            "   {}: {} → {}",
            update.installed.id, update.installed.version, update.available.version
        );
    }
    Ok(())
}
