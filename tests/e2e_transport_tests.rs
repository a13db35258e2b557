//! Command handling through the transport boundary.

mod common;

use std::sync::atomic::Ordering;

use common::{build_harness, default_harness, HarnessConfig};
use tunedrop::transport::{Command, CommandEvent, Reply};

fn track_event(user_id: &str, catalog_id: &str) -> CommandEvent {
    CommandEvent {
        user_id: user_id.to_string(),
        command: Command::Track {
            catalog_id: catalog_id.to_string(),
        },
    }
}

#[tokio::test]
async fn test_free_user_gets_standard_quality() {
    let h = default_harness();

    let reply = h.handler.handle(track_event("u1", "T1")).await;
    match reply {
        Reply::Audio { caption, .. } => {
            // Asked implicitly for the best; silently served 128 kbps.
            assert!(caption.contains("128 kbps"), "caption: {}", caption);
            assert!(caption.contains("artist x - song a"), "caption: {}", caption);
        }
        other => panic!("expected audio reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_premium_user_gets_high_quality() {
    let h = default_harness();
    h.ledger.grant_premium("p1", 30).unwrap();

    let reply = h.handler.handle(track_event("p1", "T1")).await;
    match reply {
        Reply::Audio { caption, .. } => {
            assert!(caption.contains("320 kbps"), "caption: {}", caption);
        }
        other => panic!("expected audio reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_free_bulk_denied_before_any_work() {
    let h = default_harness();

    let reply = h
        .handler
        .handle(CommandEvent {
            user_id: "u1".to_string(),
            command: Command::Album {
                catalog_id: "AL1".to_string(),
            },
        })
        .await;

    match reply {
        Reply::Error { message } => {
            assert!(message.contains("premium"), "message: {}", message);
        }
        other => panic!("expected error reply, got {:?}", other),
    }

    // Authorization preceded everything: no search, no download.
    assert_eq!(h.searches.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.downloads.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_premium_bulk_reports_per_track() {
    let h = default_harness();
    h.ledger.grant_premium("p1", 30).unwrap();

    let reply = h
        .handler
        .handle(CommandEvent {
            user_id: "p1".to_string(),
            command: Command::Playlist {
                catalog_id: "PL1".to_string(),
            },
        })
        .await;

    match reply {
        Reply::BulkReport { summary, items } => {
            assert_eq!(items.len(), 2);
            assert!(items.iter().all(|i| i.location.is_some()));
            assert!(summary.contains("2 of 2"), "summary: {}", summary);
        }
        other => panic!("expected bulk report, got {:?}", other),
    }
}

#[tokio::test]
async fn test_eleventh_request_denied_for_free_user() {
    let h = default_harness();

    for _ in 0..10 {
        let reply = h.handler.handle(track_event("u1", "T1")).await;
        assert!(matches!(reply, Reply::Audio { .. }));
    }

    let reply = h.handler.handle(track_event("u1", "T2")).await;
    match reply {
        Reply::Error { message } => {
            assert!(message.contains("daily download limit"), "message: {}", message);
        }
        other => panic!("expected error reply, got {:?}", other),
    }

    // Ten deliveries of the same track cost one production.
    assert_eq!(h.downloads.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_premium_user_never_denied() {
    let h = build_harness(HarnessConfig {
        free_daily_limit: 2,
        ..Default::default()
    });
    h.ledger.grant_premium("p1", 30).unwrap();

    for _ in 0..20 {
        let reply = h.handler.handle(track_event("p1", "T1")).await;
        assert!(matches!(reply, Reply::Audio { .. }));
    }
}

#[tokio::test]
async fn test_status_reports_quota() {
    let h = default_harness();

    h.handler.handle(track_event("u1", "T1")).await;
    let reply = h
        .handler
        .handle(CommandEvent {
            user_id: "u1".to_string(),
            command: Command::Status,
        })
        .await;

    match reply {
        Reply::Text { text } => {
            assert!(text.contains("1/10"), "status: {}", text);
            assert!(text.contains("Free"), "status: {}", text);
        }
        other => panic!("expected text reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_grant_premium_requires_admin() {
    let h = default_harness();

    let reply = h
        .handler
        .handle(CommandEvent {
            user_id: "u1".to_string(),
            command: Command::GrantPremium {
                target: "u2".to_string(),
                days: 30,
            },
        })
        .await;
    assert!(matches!(reply, Reply::Error { .. }));

    let reply = h
        .handler
        .handle(CommandEvent {
            user_id: "admin".to_string(),
            command: Command::GrantPremium {
                target: "u2".to_string(),
                days: 30,
            },
        })
        .await;
    assert!(matches!(reply, Reply::Text { .. }));

    // The grantee now downloads at high quality.
    let reply = h.handler.handle(track_event("u2", "T1")).await;
    match reply {
        Reply::Audio { caption, .. } => assert!(caption.contains("320 kbps")),
        other => panic!("expected audio reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_revoke_premium_downgrades() {
    let h = default_harness();
    h.ledger.grant_premium("u2", 30).unwrap();

    let reply = h
        .handler
        .handle(CommandEvent {
            user_id: "admin".to_string(),
            command: Command::RevokePremium {
                target: "u2".to_string(),
            },
        })
        .await;
    assert!(matches!(reply, Reply::Text { .. }));

    let reply = h.handler.handle(track_event("u2", "T1")).await;
    match reply {
        Reply::Audio { caption, .. } => assert!(caption.contains("128 kbps")),
        other => panic!("expected audio reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_not_found_renders_user_message() {
    let h = default_harness();

    let reply = h.handler.handle(track_event("u1", "MISSING")).await;
    match reply {
        Reply::Error { message } => {
            assert!(message.contains("could not be found"), "message: {}", message);
        }
        other => panic!("expected error reply, got {:?}", other),
    }
}
