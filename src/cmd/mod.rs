pub mod providers;
pub mod resolve;

use std::sync::Arc;

use anyhow::{Context, Result};

use reelsource::plugin::{ProcessLoader, ProviderApiRegistry, ProviderPreferences};
use reelsource::{Config, ProviderRegistry};

/// Open the preferences and restore every installed provider.
pub async fn open_registry(config: &Config) -> Result<Arc<ProviderRegistry>> {
    let preferences = ProviderPreferences::open(&config.preferences_path).with_context(|| {
        format!(
            "failed to open provider preferences at {}",
            config.preferences_path.display()
        )
    })?;
    let registry = ProviderRegistry::new(
        Arc::new(ProcessLoader::new(config.request_timeout())),
        Arc::new(ProviderApiRegistry::new()),
        preferences,
    )
    .with_host_capabilities(config.host_capabilities.clone());

    for (id, err) in registry.load_all().await {
        eprintln!("⚠️  Provider {id} failed to load: {err}");
    }
    Ok(Arc::new(registry))
}
