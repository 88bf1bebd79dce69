use crate::constants::ARTIFACT_EXTENSION;
use crate::types::{ParleyError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Persists finalized audio and hands back a URI the external player can open.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<String>;
}

pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir
            .join(format!("audio_{}.{}", safe_key, ARTIFACT_EXTENSION))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(key);
        let io_err = |source| ParleyError::ArtifactWrite {
            key: key.to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(&path, bytes).await.map_err(io_err)?;

        tracing::debug!(target: "artifact", "Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(format!("file://{}", path.display()))
    }
}
