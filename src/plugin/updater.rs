//! Remote provider catalog ("updater list"): fetch, diff, install.
//!
//! The catalog is a JSON array of [`ProviderMetadata`] records. Installed
//! providers are diffed against it by version to find available updates.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use tracing::{debug, info};

use super::manifest::BundleManifest;
use crate::provider::ProviderMetadata;

/// An installed provider with a newer catalog version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUpdate {
    pub installed: ProviderMetadata,
    pub available: ProviderMetadata,
}

/// HTTP client used for catalog and bundle downloads.
pub fn http_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("reelsource/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Download and parse the catalog at `url`.
pub async fn fetch_catalog(client: &Client, url: &str) -> Result<Vec<ProviderMetadata>> {
    let url = url::Url::parse(url).with_context(|| format!("invalid catalog URL '{url}'"))?;
    debug!(%url, "Fetching provider catalog");

    let resp = client.get(url.clone()).send().await?;
    if !resp.status().is_success() {
        bail!("catalog request to {url} failed: {}", resp.status());
    }
    let text = resp.text().await?;
    parse_catalog(&text)
}

pub fn parse_catalog(json: &str) -> Result<Vec<ProviderMetadata>> {
    let catalog: Vec<ProviderMetadata> =
        serde_json::from_str(json).context("catalog is not a JSON array of providers")?;
    Ok(catalog)
}

/// Installed providers whose catalog entry carries a newer version.
pub fn find_updates(
    catalog: &[ProviderMetadata],
    installed: &[ProviderMetadata],
) -> Vec<ProviderUpdate> {
    installed
        .iter()
        .filter_map(|local| {
            let remote = catalog.iter().find(|c| c.id == local.id)?;
            (compare_versions(&remote.version, &local.version) == Ordering::Greater).then(|| {
                ProviderUpdate {
                    installed: local.clone(),
                    available: remote.clone(),
                }
            })
        })
        .collect()
}

/// Compare dotted versions component-wise; numeric components compare as
/// numbers, anything else lexically. A leading `v` is ignored.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> Vec<String> {
        v.trim()
            .trim_start_matches(['v', 'V'])
            .split(['.', '-', '+'])
            .map(str::to_string)
            .collect()
    };
    let (a, b) = (parts(a), parts(b));

    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).map_or("0", String::as_str);
        let y = b.get(i).map_or("0", String::as_str);
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Download `metadata`'s build artifact into `<providers_dir>/<id>/` and
/// write its manifest. Returns the bundle directory.
pub async fn install(
    client: &Client,
    metadata: &ProviderMetadata,
    providers_dir: &Path,
) -> Result<PathBuf> {
    let build_url = metadata
        .build_url
        .as_deref()
        .ok_or_else(|| anyhow!("provider '{}' has no build URL", metadata.id))?;
    let url = url::Url::parse(build_url)
        .with_context(|| format!("invalid build URL '{build_url}'"))?;
    let file_name = artifact_name(&url, &metadata.id);

    info!(provider = %metadata.id, version = %metadata.version, %url, "Downloading provider");
    let resp = client.get(url.clone()).send().await?;
    if !resp.status().is_success() {
        bail!("download of {url} failed: {}", resp.status());
    }
    let bytes = resp.bytes().await?;

    let bundle = providers_dir.join(&metadata.id);
    tokio::fs::create_dir_all(&bundle)
        .await
        .with_context(|| format!("failed to create {}", bundle.display()))?;
    let artifact = bundle.join(&file_name);
    tokio::fs::write(&artifact, &bytes)
        .await
        .with_context(|| format!("failed to write {}", artifact.display()))?;
    make_executable(&artifact).await?;

    let manifest = BundleManifest {
        entry_point: file_name,
        name: metadata.name.clone(),
        version: metadata.version.clone(),
        requires_resources: false,
    };
    let dir = bundle.clone();
    tokio::task::spawn_blocking(move || manifest.write(&dir))
        .await?
        .with_context(|| format!("failed to write manifest in {}", bundle.display()))?;

    Ok(bundle)
}

fn artifact_name(url: &url::Url, fallback: &str) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map_or_else(|| fallback.to_string(), str::to_string)
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("v2.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0-alpha"), Ordering::Greater);
    }

    #[test]
    fn updates_only_for_newer_installed_providers() {
        let catalog = parse_catalog(
            r#"[
                {"id":"flix","name":"Flix","version":"1.3.0","buildUrl":"https://x/flix"},
                {"id":"anime","name":"Anime","version":"0.9.0"},
                {"id":"notinstalled","name":"New","version":"5.0.0"}
            ]"#,
        )
        .unwrap();
        let installed = vec![
            ProviderMetadata::new("flix", "Flix", "1.2.9"),
            ProviderMetadata::new("anime", "Anime", "0.9.0"),
            ProviderMetadata::new("local-only", "Local", "0.1.0"),
        ];

        let updates = find_updates(&catalog, &installed);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].installed.version, "1.2.9");
        assert_eq!(updates[0].available.version, "1.3.0");
    }

    #[test]
    fn catalog_must_be_an_array() {
        assert!(parse_catalog(r#"{"id":"flix"}"#).is_err());
    }

    #[test]
    fn artifact_name_from_url() {
        let url = url::Url::parse("https://cdn.example/builds/flix-provider").unwrap();
        assert_eq!(artifact_name(&url, "flix"), "flix-provider");
        let bare = url::Url::parse("https://cdn.example/").unwrap();
        assert_eq!(artifact_name(&bare, "flix"), "flix");
    }

    #[tokio::test]
    async fn install_requires_build_url() {
        let dir = tempfile::tempdir().unwrap();
        let client = http_client(Duration::from_secs(1)).unwrap();
        let err = install(&client, &ProviderMetadata::new("flix", "Flix", "1"), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no build URL"));
    }
}
