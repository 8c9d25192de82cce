//! Process-hosted providers: the bundle's entry point is an external binary.
//!
//! Every call spawns the binary, writes one request line to its stdin and
//! reads the reply from stdout within the configured timeout. A crashing
//! provider only ever takes its own child process down.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::loader::{PluginLoader, ProviderInstance};
use super::manifest::BundleManifest;
use super::LoadError;
use crate::provider::{
    Episode, LinkSink, MediaDetails, MediaType, ProviderApi, ProviderError, ProviderMetadata,
    SearchPage, Stream, Subtitle,
};

/// JSON sent to the provider on stdin.
#[derive(Serialize)]
struct PluginRequest<'a> {
    method: &'a str,
    params: Value,
}

/// Error object a provider may answer with instead of a result.
#[derive(Deserialize, Debug)]
struct PluginFailure {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl PluginFailure {
    fn into_error(self) -> ProviderError {
        match self.kind.as_str() {
            "decryption" => ProviderError::Decryption(self.message),
            "malformed" => ProviderError::MalformedResponse(self.message),
            "unsupported" => ProviderError::Unsupported(self.message),
            "http" => ProviderError::Http {
                status: 0,
                message: self.message,
            },
            "timeout" | "transport" | "network" => ProviderError::Transport(self.message),
            _ => ProviderError::Crashed(self.message),
        }
    }
}

/// One line of a `links` reply.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LinkEvent {
    Stream(Stream),
    Subtitle(Subtitle),
    Error(PluginFailure),
}

/// Loads bundles whose entry point is an executable inside the bundle.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    timeout: Duration,
}

impl ProcessLoader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl PluginLoader for ProcessLoader {
    fn load(
        &self,
        bundle: &Path,
        metadata: &ProviderMetadata,
    ) -> Result<Box<dyn ProviderInstance>, LoadError> {
        let manifest = BundleManifest::read(bundle)?;
        manifest.check_resources(bundle)?;

        let entry = Path::new(&manifest.entry_point);
        let escapes = entry
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(LoadError::ConstructorFailed {
                id: metadata.id.clone(),
                reason: format!("entry point '{}' escapes the bundle", manifest.entry_point),
            });
        }

        let binary = bundle.join(entry);
        if !binary.is_file() {
            return Err(LoadError::ConstructorFailed {
                id: metadata.id.clone(),
                reason: format!("entry point not found at {}", binary.display()),
            });
        }

        debug!(provider = %metadata.id, binary = %binary.display(), "Loaded process provider");
        Ok(Box::new(ProcessInstance {
            manifest,
            host: Arc::new(ProcessHost {
                id: metadata.id.clone(),
                binary,
                workdir: bundle.to_path_buf(),
                timeout: self.timeout,
            }),
        }))
    }
}

/// Spawns the provider binary and speaks the JSON protocol with it.
#[derive(Debug)]
struct ProcessHost {
    id: String,
    binary: PathBuf,
    workdir: PathBuf,
    timeout: Duration,
}

impl ProcessHost {
    async fn spawn(&self, method: &str, params: Value, stderr: Stdio) -> Result<Child, ProviderError> {
        let mut input = serde_json::to_vec(&PluginRequest { method, params })?;
        input.push(b'\n');

        let mut child = Command::new(&self.binary)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Crashed(format!("failed to spawn provider '{}': {e}", self.id)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await.map_err(|e| {
                ProviderError::Crashed(format!("failed to write to provider '{}' stdin: {e}", self.id))
            })?;
        }

        Ok(child)
    }

    /// Run a request that answers with a single JSON document.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ProviderError> {
        let child = self.spawn(method, params, Stdio::piped()).await?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|e| ProviderError::Crashed(format!("provider '{}' failed: {e}", self.id)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Crashed(format!(
                "provider '{}' exited with {}: {}",
                self.id,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout).map_err(|_| {
            ProviderError::MalformedResponse(format!("provider '{}' output is not valid UTF-8", self.id))
        })?;
        parse_reply(&stdout)
    }

    /// Run a `links` request, forwarding events to `sink` line by line.
    async fn stream_links(&self, params: Value, sink: &LinkSink) -> Result<(), ProviderError> {
        let mut child = self.spawn("links", params, Stdio::null()).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Crashed(format!("provider '{}' has no stdout", self.id)))?;

        let run = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut failure = None;
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| ProviderError::Crashed(e.to_string()))?
            {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LinkEvent>(&line)? {
                    LinkEvent::Stream(stream) => sink.stream(stream).await?,
                    LinkEvent::Subtitle(subtitle) => sink.subtitle(subtitle).await?,
                    LinkEvent::Error(f) => failure = Some(f.into_error()),
                }
            }

            let status = child
                .wait()
                .await
                .map_err(|e| ProviderError::Crashed(e.to_string()))?;
            if let Some(err) = failure {
                return Err(err);
            }
            if !status.success() {
                return Err(ProviderError::Crashed(format!(
                    "provider '{}' exited with {status}",
                    self.id
                )));
            }
            Ok(())
        };

        tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
    }
}

fn parse_reply<T: DeserializeOwned>(stdout: &str) -> Result<T, ProviderError> {
    let value: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        let head: String = stdout.chars().take(200).collect();
        ProviderError::MalformedResponse(format!("{e}: {head}"))
    })?;
    if let Some(error) = value.get("error") {
        let failure: PluginFailure = serde_json::from_value(error.clone())?;
        return Err(failure.into_error());
    }
    Ok(serde_json::from_value(value)?)
}

struct ProcessInstance {
    manifest: BundleManifest,
    host: Arc<ProcessHost>,
}

#[async_trait]
impl ProviderInstance for ProcessInstance {
    fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    async fn create_api(&self) -> Result<Arc<dyn ProviderApi>, ProviderError> {
        let _: Value = self.host.call("init", json!({ "id": self.host.id })).await?;
        Ok(Arc::new(ProcessProvider {
            host: Arc::clone(&self.host),
        }))
    }

    async fn teardown(&self) -> Result<(), ProviderError> {
        match self.host.call::<Value>("teardown", json!({})).await {
            Ok(_) | Err(ProviderError::Unsupported(_)) => Ok(()),
            Err(e) => {
                warn!(provider = %self.host.id, error = %e, "Provider teardown failed");
                Err(e)
            }
        }
    }
}

/// [`ProviderApi`] backed by a provider binary.
pub struct ProcessProvider {
    host: Arc<ProcessHost>,
}

#[async_trait]
impl ProviderApi for ProcessProvider {
    fn id(&self) -> &str {
        &self.host.id
    }

    async fn search(
        &self,
        query: &str,
        page: u32,
        media_type: MediaType,
    ) -> Result<SearchPage, ProviderError> {
        self.host
            .call(
                "search",
                json!({ "query": query, "page": page, "media_type": media_type }),
            )
            .await
    }

    async fn details(&self, id: &str, media_type: MediaType) -> Result<MediaDetails, ProviderError> {
        self.host
            .call("details", json!({ "id": id, "media_type": media_type }))
            .await
    }

    async fn servers(
        &self,
        id: &str,
        episode: Option<&Episode>,
    ) -> Result<Vec<String>, ProviderError> {
        match self
            .host
            .call("servers", json!({ "id": id, "episode": episode }))
            .await
        {
            Err(ProviderError::Unsupported(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn links(
        &self,
        id: &str,
        episode: Option<&Episode>,
        server: Option<&str>,
        sink: &LinkSink,
    ) -> Result<(), ProviderError> {
        self.host
            .stream_links(json!({ "id": id, "episode": episode, "server": server }), sink)
            .await
    }
}
