//! Authorization decisions and quota accounting.
//!
//! The single `authorize` decision replaces tier checks scattered across
//! command handlers: every request type consumes the same
//! `Authorized { effective_tier }` result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::info;

use crate::error::PipelineError;

use super::store::LedgerStore;
use super::{Entitlement, QualityTier, UserStatus, UserTier};

/// Quota policy knobs.
#[derive(Debug, Clone)]
pub struct QuotaSettings {
    /// Daily delivery cap for free users. Premium is unbounded.
    pub free_daily_limit: u32,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            free_daily_limit: 10,
        }
    }
}

/// Positive authorization outcome.
///
/// Free users are always downgraded to [`QualityTier::Standard`], whatever
/// they asked for; the reservation (free users only) holds their quota slot
/// until the delivery settles.
pub struct Authorized {
    pub effective_tier: QualityTier,
    pub reservation: Option<Reservation>,
}

/// A held quota slot for an in-flight delivery.
///
/// Admission counts `persisted + in-flight` against the cap, so two
/// concurrent requests can never both squeeze through the last slot. The
/// slot is freed either by [`QuotaLedger::commit_delivery`] (and the
/// persisted counter takes over) or on drop when the delivery failed; the
/// persisted counter itself never decreases.
pub struct Reservation {
    user_id: String,
    in_flight: Arc<Mutex<HashMap<String, u32>>>,
    released: bool,
}

impl Reservation {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if let Some(count) = in_flight.get_mut(&self.user_id) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&self.user_id);
            }
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}

/// The entitlement and quota ledger.
pub struct QuotaLedger {
    store: Arc<dyn LedgerStore>,
    settings: QuotaSettings,
    in_flight: Arc<Mutex<HashMap<String, u32>>>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn LedgerStore>, settings: QuotaSettings) -> Self {
        Self {
            store,
            settings,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Authorize a request before any expensive work.
    ///
    /// Checks, in order: bulk requests require premium; free users must
    /// have a quota slot left today. Free users get
    /// [`QualityTier::Standard`] regardless of `requested_tier`.
    pub fn authorize(
        &self,
        user_id: &str,
        requested_tier: QualityTier,
        is_bulk: bool,
    ) -> Result<Authorized, PipelineError> {
        let entitlement = self.ensure_user(user_id)?;
        let tier = entitlement.effective_tier(Utc::now().timestamp());

        if is_bulk && tier != UserTier::Premium {
            return Err(PipelineError::TierRequired);
        }

        if tier == UserTier::Premium {
            return Ok(Authorized {
                effective_tier: requested_tier,
                reservation: None,
            });
        }

        // Free tier: admission is serialized per user through the in-flight
        // table so the last slot cannot be handed out twice.
        let day = day_key();
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        let pending = in_flight.get(user_id).copied().unwrap_or(0);
        let delivered = self
            .store
            .consumption_for_day(user_id, &day)
            .map_err(PipelineError::internal)?;

        if delivered + pending >= self.settings.free_daily_limit {
            return Err(PipelineError::QuotaExceeded);
        }

        *in_flight.entry(user_id.to_string()).or_insert(0) += 1;
        drop(in_flight);

        Ok(Authorized {
            effective_tier: QualityTier::Standard,
            reservation: Some(Reservation {
                user_id: user_id.to_string(),
                in_flight: self.in_flight.clone(),
                released: false,
            }),
        })
    }

    /// Record one confirmed delivery.
    ///
    /// Called only once data was actually handed over, not on
    /// authorization, not on cache probes, not on failures.
    pub fn commit_delivery(
        &self,
        user_id: &str,
        reservation: Option<Reservation>,
    ) -> Result<(), PipelineError> {
        self.store
            .record_delivery(user_id, &day_key())
            .map_err(PipelineError::internal)?;
        if let Some(mut reservation) = reservation {
            reservation.release();
        }
        Ok(())
    }

    /// Fetch (or lazily create) the user's entitlement.
    pub fn ensure_user(&self, user_id: &str) -> Result<Entitlement, PipelineError> {
        if let Some(entitlement) = self
            .store
            .get_entitlement(user_id)
            .map_err(PipelineError::internal)?
        {
            return Ok(entitlement);
        }

        let entitlement = Entitlement::new_free(user_id.to_string());
        self.store
            .upsert_entitlement(&entitlement)
            .map_err(PipelineError::internal)?;
        info!("Registered new user {}", user_id);
        Ok(entitlement)
    }

    /// Admin action: grant premium for a number of days from now.
    pub fn grant_premium(&self, user_id: &str, days: u32) -> Result<Entitlement, PipelineError> {
        self.ensure_user(user_id)?;
        let entitlement = Entitlement {
            user_id: user_id.to_string(),
            tier: UserTier::Premium,
            premium_until: Some(Utc::now().timestamp() + days as i64 * 86_400),
        };
        self.store
            .upsert_entitlement(&entitlement)
            .map_err(PipelineError::internal)?;
        info!("Granted premium to {} for {} days", user_id, days);
        Ok(entitlement)
    }

    /// Admin action: drop a user back to free immediately.
    pub fn revoke_premium(&self, user_id: &str) -> Result<(), PipelineError> {
        self.store
            .upsert_entitlement(&Entitlement::new_free(user_id.to_string()))
            .map_err(PipelineError::internal)?;
        info!("Revoked premium from {}", user_id);
        Ok(())
    }

    /// Current standing for the status command.
    pub fn status(&self, user_id: &str) -> Result<UserStatus, PipelineError> {
        let entitlement = self.ensure_user(user_id)?;
        let now = Utc::now().timestamp();
        let tier = entitlement.effective_tier(now);
        let delivered_today = self
            .store
            .consumption_for_day(user_id, &day_key())
            .map_err(PipelineError::internal)?;
        let total_deliveries = self
            .store
            .total_deliveries(user_id)
            .map_err(PipelineError::internal)?;

        let remaining_today = match tier {
            UserTier::Premium => None,
            UserTier::Free => Some(
                self.settings
                    .free_daily_limit
                    .saturating_sub(delivered_today),
            ),
        };

        Ok(UserStatus {
            tier,
            premium_until: match tier {
                UserTier::Premium => entitlement.premium_until,
                UserTier::Free => None,
            },
            delivered_today,
            remaining_today,
            total_deliveries,
        })
    }
}

/// Key for today's consumption row, derived from the clock at access time.
/// Counters for past days are simply never read again.
fn day_key() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
