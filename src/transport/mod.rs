//! Chat-transport boundary.
//!
//! The transport (whatever chat platform fronts the service) hands us
//! `(user, command)` events and renders the replies we return: an audio
//! reference with a caption, a text block, or a user-facing error. Raw
//! upstream failures never leak into reply text.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::catalog::CollectionKind;
use crate::error::PipelineError;
use crate::ledger::{QualityTier, QuotaLedger, UserStatus, UserTier};
use crate::pipeline::{BulkDelivery, Delivery, DeliveryPipeline};
use crate::storage::LocationRef;

/// A command as delivered by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Track { catalog_id: String },
    Album { catalog_id: String },
    Playlist { catalog_id: String },
    Status,
    GrantPremium { target: String, days: u32 },
    RevokePremium { target: String },
}

/// One incoming transport event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub user_id: String,
    #[serde(flatten)]
    pub command: Command,
}

/// Per-track line in a bulk reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReplyItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the transport should render back to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Audio {
        location: LocationRef,
        caption: String,
    },
    BulkReport {
        summary: String,
        items: Vec<BulkReplyItem>,
    },
    Text {
        text: String,
    },
    Error {
        message: String,
    },
}

/// Dispatches transport events into the pipeline and ledger.
pub struct CommandHandler {
    pipeline: Arc<DeliveryPipeline>,
    ledger: Arc<QuotaLedger>,
    admins: HashSet<String>,
}

impl CommandHandler {
    pub fn new(
        pipeline: Arc<DeliveryPipeline>,
        ledger: Arc<QuotaLedger>,
        admins: HashSet<String>,
    ) -> Self {
        Self {
            pipeline,
            ledger,
            admins,
        }
    }

    pub async fn handle(&self, event: CommandEvent) -> Reply {
        let user_id = event.user_id;
        match event.command {
            Command::Track { catalog_id } => {
                // Everyone asks for the best quality; entitlement decides
                // what they actually get.
                match self
                    .pipeline
                    .request_track(&user_id, &catalog_id, QualityTier::High)
                    .await
                {
                    Ok(delivery) => Reply::Audio {
                        caption: caption_for(&delivery),
                        location: delivery.artifact.location,
                    },
                    Err(e) => self.render_error(&user_id, &catalog_id, e),
                }
            }
            Command::Album { catalog_id } => {
                self.handle_bulk(&user_id, &catalog_id, CollectionKind::Album)
                    .await
            }
            Command::Playlist { catalog_id } => {
                self.handle_bulk(&user_id, &catalog_id, CollectionKind::Playlist)
                    .await
            }
            Command::Status => match self.ledger.status(&user_id) {
                Ok(status) => Reply::Text {
                    text: format_status(&status),
                },
                Err(e) => self.render_error(&user_id, "status", e),
            },
            Command::GrantPremium { target, days } => {
                if !self.admins.contains(&user_id) {
                    return Reply::Error {
                        message: "You are not authorized to use this command.".to_string(),
                    };
                }
                match self.ledger.grant_premium(&target, days) {
                    Ok(entitlement) => {
                        info!("Admin {} granted premium to {}", user_id, target);
                        Reply::Text {
                            text: format!(
                                "Granted premium to {} until {}.",
                                target,
                                format_day(entitlement.premium_until.unwrap_or_default())
                            ),
                        }
                    }
                    Err(e) => self.render_error(&user_id, &target, e),
                }
            }
            Command::RevokePremium { target } => {
                if !self.admins.contains(&user_id) {
                    return Reply::Error {
                        message: "You are not authorized to use this command.".to_string(),
                    };
                }
                match self.ledger.revoke_premium(&target) {
                    Ok(()) => {
                        info!("Admin {} revoked premium from {}", user_id, target);
                        Reply::Text {
                            text: format!("Revoked premium from {}.", target),
                        }
                    }
                    Err(e) => self.render_error(&user_id, &target, e),
                }
            }
        }
    }

    async fn handle_bulk(&self, user_id: &str, catalog_id: &str, kind: CollectionKind) -> Reply {
        match self
            .pipeline
            .request_collection(user_id, catalog_id, kind, QualityTier::High)
            .await
        {
            Ok(bulk) => bulk_report(&bulk),
            Err(e) => self.render_error(user_id, catalog_id, e),
        }
    }

    fn render_error(&self, user_id: &str, subject: &str, e: PipelineError) -> Reply {
        // Full detail to the log; only the fixed category text to the user.
        error!("Command from {} on '{}' failed: {}", user_id, subject, e);
        Reply::Error {
            message: e.user_message().to_string(),
        }
    }
}

fn caption_for(delivery: &Delivery) -> String {
    format!(
        "{} ({} kbps)",
        delivery.identity.label(),
        delivery.artifact.tier.bitrate_kbps()
    )
}

fn bulk_report(bulk: &BulkDelivery) -> Reply {
    let items = bulk
        .tracks
        .iter()
        .map(|track| match &track.outcome {
            Ok(delivery) => BulkReplyItem {
                label: caption_for(delivery),
                location: Some(delivery.artifact.location.clone()),
                error: None,
            },
            Err(e) => BulkReplyItem {
                label: track.identity.label(),
                location: None,
                error: Some(e.user_message().to_string()),
            },
        })
        .collect::<Vec<_>>();

    Reply::BulkReport {
        summary: format!(
            "{} delivered, {} of {} tracks",
            bulk.kind.as_str(),
            bulk.delivered_count(),
            bulk.tracks.len()
        ),
        items,
    }
}

fn format_status(status: &UserStatus) -> String {
    match status.tier {
        UserTier::Premium => format!(
            "Premium user (expires {}). Unlimited downloads at 320 kbps. Delivered today: {}. Lifetime: {}.",
            status
                .premium_until
                .map(format_day)
                .unwrap_or_else(|| "never".to_string()),
            status.delivered_today,
            status.total_deliveries
        ),
        UserTier::Free => format!(
            "Free user. Downloads today: {}/{} at 128 kbps. Lifetime: {}.",
            status.delivered_today,
            status.delivered_today + status.remaining_today.unwrap_or(0),
            status.total_deliveries
        ),
    }
}

fn format_day(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_event_parsing() {
        let event: CommandEvent = serde_json::from_str(
            r#"{"user_id": "u1", "command": "track", "catalog_id": "T1"}"#,
        )
        .unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(
            event.command,
            Command::Track {
                catalog_id: "T1".to_string()
            }
        );

        let event: CommandEvent =
            serde_json::from_str(r#"{"user_id": "u2", "command": "status"}"#).unwrap();
        assert_eq!(event.command, Command::Status);

        let event: CommandEvent = serde_json::from_str(
            r#"{"user_id": "admin", "command": "grant_premium", "target": "u9", "days": 30}"#,
        )
        .unwrap();
        assert_eq!(
            event.command,
            Command::GrantPremium {
                target: "u9".to_string(),
                days: 30
            }
        );
    }

    #[test]
    fn test_reply_serialization_shape() {
        let reply = Reply::Audio {
            location: LocationRef("obj.mp3".to_string()),
            caption: "artist x - song a (128 kbps)".to_string(),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["location"], "obj.mp3");
    }

    #[test]
    fn test_status_formatting() {
        let free = UserStatus {
            tier: UserTier::Free,
            premium_until: None,
            delivered_today: 3,
            remaining_today: Some(7),
            total_deliveries: 40,
        };
        let text = format_status(&free);
        assert!(text.contains("3/10"));
        assert!(text.contains("128 kbps"));

        let premium = UserStatus {
            tier: UserTier::Premium,
            premium_until: Some(1_700_000_000),
            delivered_today: 2,
            remaining_today: None,
            total_deliveries: 9,
        };
        let text = format_status(&premium);
        assert!(text.contains("Unlimited"));
        assert!(text.contains("2023-11-14"));
    }
}
