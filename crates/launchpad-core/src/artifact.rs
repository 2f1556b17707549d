//! Read-only access to the artifact registry.
//!
//! The registry is owned by the export pipeline. Launchpad only reads an
//! artifact's metadata and hashes its payload to verify the declared
//! checksum before anything else looks at the metrics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::types::ModelArtifact;

/// Metadata file inside an artifact directory.
pub const METADATA_FILE: &str = "artifact.json";
/// Payload file inside an artifact directory.
pub const PAYLOAD_FILE: &str = "model.bin";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact id: {0}")]
    InvalidId(String),

    #[error("failed to read artifact {id}: {reason}")]
    Io { id: String, reason: String },

    #[error("invalid metadata for artifact {id}: {reason}")]
    Metadata { id: String, reason: String },

    #[error("checksum mismatch for artifact {id}: declared {expected}, payload {actual}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },
}

/// Source of model artifacts, addressed by id.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Load the artifact's metadata record.
    async fn fetch(&self, id: &str) -> Result<ModelArtifact, RegistryError>;

    /// Lowercase hex SHA-256 of the artifact payload.
    async fn payload_digest(&self, id: &str) -> Result<String, RegistryError>;
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fetch an artifact and verify its payload against the declared checksum.
pub async fn fetch_verified(
    registry: &dyn ArtifactRegistry,
    id: &str,
) -> Result<ModelArtifact, RegistryError> {
    let artifact = registry.fetch(id).await?;
    let actual = registry.payload_digest(id).await?;
    if !artifact.checksum.eq_ignore_ascii_case(&actual) {
        return Err(RegistryError::ChecksumMismatch {
            id: id.to_string(),
            expected: artifact.checksum.clone(),
            actual,
        });
    }
    debug!(artifact = %id, "artifact checksum verified");
    Ok(artifact)
}

/// Registry laid out on disk as `{root}/{id}/artifact.json` plus
/// `{root}/{id}/model.bin`.
#[derive(Debug, Clone)]
pub struct FsArtifactRegistry {
    root: PathBuf,
}

impl FsArtifactRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, id: &str) -> Result<PathBuf, RegistryError> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(RegistryError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl ArtifactRegistry for FsArtifactRegistry {
    async fn fetch(&self, id: &str) -> Result<ModelArtifact, RegistryError> {
        let path = self.artifact_dir(id)?.join(METADATA_FILE);
        let content = match tokio::fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(id.to_string()));
            }
            Err(e) => {
                return Err(RegistryError::Io {
                    id: id.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let artifact: ModelArtifact =
            serde_json::from_slice(&content).map_err(|e| RegistryError::Metadata {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        if artifact.id != id {
            return Err(RegistryError::Metadata {
                id: id.to_string(),
                reason: format!("metadata declares id {}", artifact.id),
            });
        }
        Ok(artifact)
    }

    async fn payload_digest(&self, id: &str) -> Result<String, RegistryError> {
        let path = self.artifact_dir(id)?.join(PAYLOAD_FILE);
        let io_err = |e: std::io::Error| RegistryError::Io {
            id: id.to_string(),
            reason: e.to_string(),
        };
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(id.to_string()));
            }
            Err(e) => return Err(io_err(e)),
        };

        // Stream the payload; model files can be large.
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await.map_err(io_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// In-process registry, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactRegistry {
    artifacts: RwLock<HashMap<String, (ModelArtifact, Vec<u8>)>>,
}

impl MemoryArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an artifact with its payload. The declared checksum is kept
    /// as-is so tests can model corrupt uploads.
    pub fn insert(&self, artifact: ModelArtifact, payload: Vec<u8>) {
        let mut artifacts = self.artifacts.write().unwrap_or_else(|e| e.into_inner());
        artifacts.insert(artifact.id.clone(), (artifact, payload));
    }
}

#[async_trait]
impl ArtifactRegistry for MemoryArtifactRegistry {
    async fn fetch(&self, id: &str) -> Result<ModelArtifact, RegistryError> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        artifacts
            .get(id)
            .map(|(a, _)| a.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn payload_digest(&self, id: &str) -> Result<String, RegistryError> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        artifacts
            .get(id)
            .map(|(_, payload)| sha256_hex(payload))
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}
