//! Filter descriptors: static configuration plus the resolution step that
//! turns a code/blob URI pair into a runnable connector.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::external::BlobCache;
use crate::hash::{fast128, join_space};
use crate::session::SessionContext;
use crate::worker::{FilterWorker, SubprocessWorker, TcpWorker};

const DOCKER_MARKER: &[u8] = b"diamond-docker-";
const DOCKER_MARKER_SCAN_LEN: usize = 100;
const DEFAULT_DOCKER_PORT: u16 = 5555;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Default,
    Docker,
}

/// Derived fields produced by [`FilterDescriptor::resolve`]. Grouped in one
/// struct behind `Option` so "all resolved fields present or none are" is a
/// type-level guarantee.
pub struct Resolved {
    pub code_path: PathBuf,
    pub code_signature: String,
    pub blob: Vec<u8>,
    pub blob_signature: String,
    pub cache_digest: String,
    pub mode: FilterMode,
    docker: Option<DockerManifest>,
}

#[derive(Debug, Deserialize)]
struct DockerManifest {
    docker_image: String,
    docker_command: Option<String>,
    #[serde(default = "default_docker_port")]
    docker_port: u16,
    filter_command: Option<String>,
}

fn default_docker_port() -> u16 {
    DEFAULT_DOCKER_PORT
}

/// The static configuration of one filter.
pub struct FilterDescriptor {
    pub name: String,
    pub code_source: String,
    pub blob_source: String,
    pub arguments: Vec<String>,
    pub dependencies: Vec<String>,
    pub min_score: f64,
    pub max_score: f64,
    resolved: Option<Resolved>,
}

impl FilterDescriptor {
    pub fn new(
        name: impl Into<String>,
        code_source: impl Into<String>,
        blob_source: impl Into<String>,
        arguments: Vec<String>,
        dependencies: Vec<String>,
        min_score: f64,
        max_score: f64,
    ) -> Self {
        Self {
            name: name.into(),
            code_source: code_source.into(),
            blob_source: blob_source.into(),
            arguments,
            dependencies,
            min_score,
            max_score,
            resolved: None,
        }
    }

    pub fn resolved(&self) -> Option<&Resolved> {
        self.resolved.as_ref()
    }

    /// Idempotent: a second call is a no-op.
    pub fn resolve(&mut self, blobs: &dyn BlobCache) -> Result<()> {
        if self.resolved.is_some() {
            return Ok(());
        }

        let code_digest = parse_sha256_source(&self.code_source)?;
        let code_path = blobs
            .executable_path(&code_digest)
            .ok_or_else(|| EngineError::Dependency(format!("code not in blob cache: {code_digest}")))?;

        let blob_digest = parse_sha256_source(&self.blob_source)?;
        let blob = blobs
            .get(&blob_digest)
            .ok_or_else(|| EngineError::Dependency(format!("blob not in blob cache: {blob_digest}")))?;

        let cache_digest = fast128(
            join_space(
                std::iter::once(code_digest.as_str())
                    .chain(std::iter::once(self.name.as_str()))
                    .chain(self.arguments.iter().map(|a| a.as_str()))
                    .chain(std::iter::once(blob_digest.as_str())),
            )
            .as_bytes(),
        );

        let head = std::fs::read(&code_path).map_err(EngineError::Io)?;
        let scan_len = head.len().min(DOCKER_MARKER_SCAN_LEN);
        let is_docker = head[..scan_len]
            .windows(DOCKER_MARKER.len())
            .any(|w| w == DOCKER_MARKER);

        let (mode, docker) = if is_docker {
            // The marker line itself (`diamond-docker-...`) is not valid
            // YAML; the manifest proper starts at the next line.
            let yaml_start = head.iter().position(|&b| b == b'\n').map_or(0, |i| i + 1);
            let manifest: DockerManifest = serde_yaml::from_slice(&head[yaml_start..]).map_err(|e| {
                EngineError::Dependency(format!("invalid docker manifest for {}: {e}", self.name))
            })?;
            if manifest.docker_command.is_none() && manifest.filter_command.is_none() {
                return Err(EngineError::Dependency(format!(
                    "docker manifest for {} missing filter_command",
                    self.name
                )));
            }
            (FilterMode::Docker, Some(manifest))
        } else {
            (FilterMode::Default, None)
        };

        self.resolved = Some(Resolved {
            code_path,
            code_signature: code_digest,
            blob,
            blob_signature: blob_digest,
            cache_digest,
            mode,
            docker,
        });
        Ok(())
    }

    /// Produces a fresh, live connection to this filter. Must be called
    /// only after [`Self::resolve`].
    pub fn connect(&self, session: &dyn SessionContext) -> Result<Box<dyn FilterWorker>> {
        let resolved = self
            .resolved
            .as_ref()
            .expect("connect called before resolve");

        match resolved.mode {
            FilterMode::Default => {
                let worker = SubprocessWorker::spawn(
                    &resolved.code_path,
                    &self.name,
                    &self.arguments,
                    &resolved.blob,
                )?;
                Ok(Box::new(worker))
            }
            FilterMode::Docker => {
                let manifest = resolved.docker.as_ref().expect("docker mode without manifest");
                let command = manifest.docker_command.clone().unwrap_or_else(|| {
                    format!(
                        "socat TCP-LISTEN:{},fork EXEC:'{} --filter'",
                        manifest.docker_port,
                        manifest.filter_command.as_deref().unwrap_or("")
                    )
                });
                let args = vec![manifest.docker_image.clone().into_bytes(), command.into_bytes()];
                let resources = session.ensure_resource("docker", &args)?;
                let host = resources.get("IPAddress").ok_or_else(|| {
                    EngineError::Dependency("docker resource missing IPAddress".to_string())
                })?;
                let worker = TcpWorker::connect(
                    host,
                    manifest.docker_port,
                    &self.name,
                    &self.arguments,
                    &resolved.blob,
                )?;
                Ok(Box::new(worker))
            }
        }
    }
}

/// Parses a `sha256:<hex-digest>` source URI, returning the lowercased hex
/// digest.
fn parse_sha256_source(source: &str) -> Result<String> {
    let (scheme, path) = source
        .split_once(':')
        .ok_or_else(|| EngineError::UnsupportedSource(source.to_string()))?;
    if scheme != "sha256" {
        return Err(EngineError::UnsupportedSource(scheme.to_string()));
    }
    Ok(path.to_lowercase())
}
