//! SQLite-backed cache index.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::ledger::QualityTier;
use crate::storage::LocationRef;

use super::{Artifact, ArtifactCache, CacheKey, CacheWrite};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artifact (
    key           TEXT PRIMARY KEY,
    location      TEXT NOT NULL,
    byte_size     INTEGER NOT NULL,
    duration_secs INTEGER NOT NULL,
    tier          TEXT NOT NULL,
    created_at    INTEGER NOT NULL
);
";

/// Cache index over a SQLite table, keyed by the derived cache key.
pub struct SqliteArtifactCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteArtifactCache {
    /// Open (or create) the cache index at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open cache database {:?}", path))?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize cache schema")?;
        info!("Artifact cache ready at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory cache for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize cache schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("cache connection lock poisoned")
    }
}

impl ArtifactCache for SqliteArtifactCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Artifact>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT location, byte_size, duration_secs, tier, created_at
             FROM artifact WHERE key = ?1",
            params![key.as_str()],
            |row| {
                let location: String = row.get(0)?;
                let byte_size: u64 = row.get(1)?;
                let duration_secs: u32 = row.get(2)?;
                let tier: String = row.get(3)?;
                let created_at: i64 = row.get(4)?;
                Ok((location, byte_size, duration_secs, tier, created_at))
            },
        )
        .optional()
        .context("Failed to query artifact")?
        .map(|(location, byte_size, duration_secs, tier, created_at)| {
            let tier = QualityTier::from_str(&tier)
                .with_context(|| format!("Unknown tier '{}' in cache row {}", tier, key))?;
            Ok(Artifact {
                key: key.clone(),
                location: LocationRef(location),
                byte_size,
                duration_secs,
                tier,
                created_at,
            })
        })
        .transpose()
    }

    fn put(&self, artifact: &Artifact) -> Result<CacheWrite> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO artifact
                 (key, location, byte_size, duration_secs, tier, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    artifact.key.as_str(),
                    artifact.location.0,
                    artifact.byte_size,
                    artifact.duration_secs,
                    artifact.tier.as_str(),
                    artifact.created_at,
                ],
            )
            .context("Failed to register artifact")?;

        if changed == 0 {
            Ok(CacheWrite::AlreadyExists)
        } else {
            Ok(CacheWrite::Inserted)
        }
    }
}
