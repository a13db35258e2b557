//! SQLite persistence for entitlements and consumption counters.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{Entitlement, UserTier};

/// Persistence boundary for the ledger.
///
/// The backing store needs read-your-writes consistency per key, nothing
/// stronger; cross-user ordering is irrelevant.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait LedgerStore: Send + Sync {
    /// Fetch a user's entitlement record.
    fn get_entitlement(&self, user_id: &str) -> Result<Option<Entitlement>>;

    /// Insert or replace an entitlement record.
    fn upsert_entitlement(&self, entitlement: &Entitlement) -> Result<()>;

    /// Deliveries recorded for a user on the given day key. Absence of a
    /// row reads as zero; that absence is the daily reset.
    fn consumption_for_day(&self, user_id: &str, day: &str) -> Result<u32>;

    /// Record one confirmed delivery: increments the day counter and the
    /// lifetime total.
    fn record_delivery(&self, user_id: &str, day: &str) -> Result<()>;

    /// Lifetime delivery count for a user.
    fn total_deliveries(&self, user_id: &str) -> Result<u64>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entitlement (
    user_id          TEXT PRIMARY KEY,
    tier             TEXT NOT NULL,
    premium_until    INTEGER,
    total_deliveries INTEGER NOT NULL DEFAULT 0,
    created_at       INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS consumption (
    user_id   TEXT NOT NULL,
    day       TEXT NOT NULL,
    delivered INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, day)
);
";

/// SQLite-backed ledger store.
pub struct SqliteLedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedgerStore {
    /// Open (or create) the ledger database at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger database {:?}", path))?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize ledger schema")?;
        info!("Ledger database ready at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize ledger schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("ledger connection lock poisoned")
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn get_entitlement(&self, user_id: &str) -> Result<Option<Entitlement>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT tier, premium_until FROM entitlement WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let tier: String = row.get(0)?;
                    let premium_until: Option<i64> = row.get(1)?;
                    Ok((tier, premium_until))
                },
            )
            .optional()
            .context("Failed to query entitlement")?;

        Ok(row.map(|(tier, premium_until)| Entitlement {
            user_id: user_id.to_string(),
            tier: UserTier::from_str(&tier).unwrap_or(UserTier::Free),
            premium_until,
        }))
    }

    fn upsert_entitlement(&self, entitlement: &Entitlement) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO entitlement (user_id, tier, premium_until, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET tier = ?2, premium_until = ?3",
            params![
                entitlement.user_id,
                entitlement.tier.as_str(),
                entitlement.premium_until,
                chrono::Utc::now().timestamp(),
            ],
        )
        .context("Failed to upsert entitlement")?;
        Ok(())
    }

    fn consumption_for_day(&self, user_id: &str, day: &str) -> Result<u32> {
        let conn = self.lock();
        let delivered: Option<u32> = conn
            .query_row(
                "SELECT delivered FROM consumption WHERE user_id = ?1 AND day = ?2",
                params![user_id, day],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query consumption")?;
        Ok(delivered.unwrap_or(0))
    }

    fn record_delivery(&self, user_id: &str, day: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO consumption (user_id, day, delivered) VALUES (?1, ?2, 1)
             ON CONFLICT(user_id, day) DO UPDATE SET delivered = delivered + 1",
            params![user_id, day],
        )
        .context("Failed to record consumption")?;
        conn.execute(
            "UPDATE entitlement SET total_deliveries = total_deliveries + 1 WHERE user_id = ?1",
            params![user_id],
        )
        .context("Failed to bump lifetime deliveries")?;
        Ok(())
    }

    fn total_deliveries(&self, user_id: &str) -> Result<u64> {
        let conn = self.lock();
        let total: Option<u64> = conn
            .query_row(
                "SELECT total_deliveries FROM entitlement WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query lifetime deliveries")?;
        Ok(total.unwrap_or(0))
    }
}
