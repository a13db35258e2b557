//! Durable artifact storage.
//!
//! The cache index persists only [`LocationRef`]s; the bytes live behind
//! this boundary. Capacity management and eviction belong to external
//! housekeeping, not to this crate.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque reference to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationRef(pub String);

impl std::fmt::Display for LocationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Storage collaborator boundary.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    /// Persist the file at `src` and return a reference to it. The source
    /// file is left in place; callers own its cleanup.
    async fn store(&self, src: &Path) -> Result<LocationRef>;

    /// Resolve a reference to a readable local path.
    async fn retrieve(&self, location: &LocationRef) -> Result<PathBuf>;
}

/// Filesystem-backed storage: objects are uuid-named files under a media
/// directory.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create media directory {:?}", root))?;
        Ok(Self { root })
    }
}

#[async_trait]
impl DurableStorage for FsStorage {
    async fn store(&self, src: &Path) -> Result<LocationRef> {
        let name = format!("{}.mp3", uuid::Uuid::new_v4());
        let dest = self.root.join(&name);

        // Copy rather than rename: the source may sit on another filesystem
        // (temp dir).
        tokio::fs::copy(src, &dest)
            .await
            .with_context(|| format!("Failed to store {:?} as {:?}", src, dest))?;

        Ok(LocationRef(name))
    }

    async fn retrieve(&self, location: &LocationRef) -> Result<PathBuf> {
        let path = self.root.join(&location.0);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            bail!("Stored object missing: {}", location);
        }
        Ok(path)
    }
}
