//! Content-addressed artifact cache.
//!
//! Maps (track identity, quality tier) to a previously produced audio
//! artifact, so each pair is produced exactly once. The index stores only
//! storage references and fingerprints, never audio bytes.

mod sqlite_store;

pub use sqlite_store::SqliteArtifactCache;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::TrackIdentity;
use crate::ledger::QualityTier;
use crate::storage::LocationRef;

/// Width of the duration quantization bucket used in key derivation.
/// Entries whose durations agree within the resolver tolerance land in the
/// same bucket.
const DURATION_BUCKET_SECS: u32 = 3;

/// Deterministic key of a (track, quality) pair.
///
/// Derived from the normalized identity fields, never from the requester:
/// two users asking for the same track at the same tier always produce the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(identity: &TrackIdentity, tier: QualityTier) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identity.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(identity.artist.as_bytes());
        hasher.update([0u8]);
        hasher.update((identity.duration_secs / DURATION_BUCKET_SECS).to_be_bytes());
        hasher.update(tier.as_str().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rehydrate a key from its stored hex form.
    pub fn from_string(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A produced audio object. Immutable after creation; a STANDARD and a HIGH
/// artifact for the same track coexist as distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: CacheKey,
    pub location: LocationRef,
    pub byte_size: u64,
    pub duration_secs: u32,
    pub tier: QualityTier,
    pub created_at: i64,
}

/// Result of a cache registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    Inserted,
    /// The key was already registered; the earlier artifact stands. Not an
    /// error.
    AlreadyExists,
}

/// Cache index boundary: O(1) get, idempotent first-writer-wins put. The
/// cache never evicts; capacity is external housekeeping's problem.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait ArtifactCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> anyhow::Result<Option<Artifact>>;

    fn put(&self, artifact: &Artifact) -> anyhow::Result<CacheWrite>;
}
