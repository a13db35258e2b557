//! Entitlement and quota ledger.
//!
//! Tracks each user's tier and daily consumption, and decides, before any
//! expensive work starts, whether a request is admitted and at which
//! effective quality.

mod quota;
mod store;

pub use quota::{Authorized, QuotaLedger, QuotaSettings, Reservation};
pub use store::{LedgerStore, SqliteLedgerStore};

use serde::{Deserialize, Serialize};

/// Audio quality tier of a produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Standard,
    High,
}

impl QualityTier {
    /// Target encoder bitrate for this tier.
    pub fn bitrate_kbps(&self) -> u32 {
        match self {
            QualityTier::Standard => 128,
            QualityTier::High => 320,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Standard => "STANDARD",
            QualityTier::High => "HIGH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STANDARD" => Some(QualityTier::Standard),
            "HIGH" => Some(QualityTier::High),
            _ => None,
        }
    }
}

/// Access tier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserTier {
    Free,
    Premium,
}

impl UserTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserTier::Free => "FREE",
            UserTier::Premium => "PREMIUM",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "FREE" => Some(UserTier::Free),
            "PREMIUM" => Some(UserTier::Premium),
            _ => None,
        }
    }
}

/// Per-user entitlement record.
///
/// The stored tier may say PREMIUM after the expiry has passed; readers must
/// go through [`Entitlement::effective_tier`], which derives the live tier.
/// No explicit downgrade event exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    pub user_id: String,
    pub tier: UserTier,
    /// Unix timestamp after which premium lapses. None for free users.
    pub premium_until: Option<i64>,
}

impl Entitlement {
    /// A brand-new user starts free.
    pub fn new_free(user_id: String) -> Self {
        Self {
            user_id,
            tier: UserTier::Free,
            premium_until: None,
        }
    }

    /// Live tier at `now`, lazily downgrading expired premium.
    pub fn effective_tier(&self, now: i64) -> UserTier {
        match (self.tier, self.premium_until) {
            (UserTier::Premium, Some(until)) if until <= now => UserTier::Free,
            (tier, _) => tier,
        }
    }
}

/// Snapshot of a user's standing, for the status command.
#[derive(Debug, Clone, Serialize)]
pub struct UserStatus {
    pub tier: UserTier,
    /// Unix timestamp of premium expiry, when premium is active.
    pub premium_until: Option<i64>,
    /// Deliveries consumed today.
    pub delivered_today: u32,
    /// Deliveries left today; None means unbounded.
    pub remaining_today: Option<u32>,
    /// Lifetime deliveries.
    pub total_deliveries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_tier_bitrates() {
        assert_eq!(QualityTier::Standard.bitrate_kbps(), 128);
        assert_eq!(QualityTier::High.bitrate_kbps(), 320);
    }

    #[test]
    fn test_tier_string_round_trip() {
        assert_eq!(QualityTier::from_str("STANDARD"), Some(QualityTier::Standard));
        assert_eq!(QualityTier::from_str("HIGH"), Some(QualityTier::High));
        assert_eq!(QualityTier::from_str("ultra"), None);

        assert_eq!(UserTier::from_str("FREE"), Some(UserTier::Free));
        assert_eq!(UserTier::from_str("PREMIUM"), Some(UserTier::Premium));
        assert_eq!(UserTier::from_str(""), None);
    }

    #[test]
    fn test_effective_tier_lazy_downgrade() {
        let ent = Entitlement {
            user_id: "u1".to_string(),
            tier: UserTier::Premium,
            premium_until: Some(1000),
        };
        assert_eq!(ent.effective_tier(999), UserTier::Premium);
        assert_eq!(ent.effective_tier(1000), UserTier::Free);
        assert_eq!(ent.effective_tier(5000), UserTier::Free);
    }

    #[test]
    fn test_free_user_never_upgrades() {
        let ent = Entitlement::new_free("u1".to_string());
        assert_eq!(ent.effective_tier(0), UserTier::Free);
        assert_eq!(ent.effective_tier(i64::MAX), UserTier::Free);
    }
}
