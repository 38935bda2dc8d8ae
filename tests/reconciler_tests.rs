// Reconciler properties exercised at the crate boundary: tolerance window
// edges, authoritative overrides, and idempotence across fold operations.

mod common;

use common::setup_logging;

use chrono::{DateTime, Duration as TimeDelta, TimeZone, Utc};

use confab::models::{Message, MessageStatus};
use confab::reconcile::{ReconcilerConfig, TimelineReconciler};

const ME: &str = "me";

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn message(id: &str, sender: &str, content: &str, secs: i64, status: MessageStatus) -> Message {
    Message {
        id: id.to_string(),
        thread_id: "t1".to_string(),
        sender_id: sender.to_string(),
        sender_name: sender.to_string(),
        content: content.to_string(),
        timestamp: at(secs),
        status,
        attachments: Vec::new(),
        audio_url: None,
    }
}

fn optimistic(content: &str, secs: i64) -> Message {
    let mut msg = message("x", ME, content, secs, MessageStatus::Pending);
    msg.id = format!("local-{}", uuid::Uuid::new_v4());
    msg
}

#[test]
fn confirmation_outside_tolerance_is_a_different_message() {
    setup_logging();
    let config = ReconcilerConfig {
        tolerance: TimeDelta::seconds(10),
        ..ReconcilerConfig::default()
    };
    let mut rec = TimelineReconciler::new(ME, config);

    let msg = optimistic("hello", 0);
    let local_id = msg.id.clone();
    rec.push_optimistic(msg);
    rec.mark_sent(&local_id, at(0));

    // Same sender and content, but 30 seconds away: not the same logical
    // message, so both remain.
    let report = rec.merge(
        vec![message("srv-1", ME, "hello", 30, MessageStatus::Sent)],
        at(31),
    );
    assert!(report.changed);
    assert_eq!(rec.rendered().len(), 2);
    assert!(rec.rendered().iter().any(|m| m.id == local_id));
    assert!(rec.rendered().iter().any(|m| m.id == "srv-1"));
}

#[test]
fn adoption_overrides_simulated_status() {
    setup_logging();
    let mut rec = TimelineReconciler::new(ME, ReconcilerConfig::default());

    let msg = optimistic("hello", 0);
    let local_id = msg.id.clone();
    rec.push_optimistic(msg);
    rec.mark_sent(&local_id, at(0));
    rec.merge(vec![message("srv-1", ME, "hello", 0, MessageStatus::Sent)], at(1));

    // Simulation runs ahead to Read.
    assert!(rec.tick_simulation(at(20)));
    assert_eq!(rec.rendered()[0].status, MessageStatus::Read);

    // The next authoritative snapshot says Delivered; authority wins.
    rec.merge(
        vec![message("srv-1", ME, "hello", 0, MessageStatus::Delivered)],
        at(25),
    );
    assert_eq!(rec.rendered()[0].status, MessageStatus::Delivered);
}

#[test]
fn merge_is_idempotent_after_a_fold() {
    setup_logging();
    let mut rec = TimelineReconciler::new(ME, ReconcilerConfig::default());

    let msg = optimistic("hi", 10);
    let local_id = msg.id.clone();
    rec.push_optimistic(msg);
    rec.mark_sent(&local_id, at(10));

    let snapshot = vec![
        message("m1", "peer", "welcome", 0, MessageStatus::Delivered),
        message("srv-1", ME, "hi", 11, MessageStatus::Sent),
    ];
    let first = rec.merge(snapshot.clone(), at(12));
    assert!(first.changed);
    let rendered = rec.rendered().to_vec();

    let second = rec.merge(snapshot, at(14));
    assert!(!second.changed);
    assert_eq!(rec.rendered(), rendered.as_slice());
}

#[test]
fn interleaved_optimistic_entries_keep_timestamps_ordered() {
    setup_logging();
    let mut rec = TimelineReconciler::new(ME, ReconcilerConfig::default());

    rec.merge(
        vec![
            message("m1", "peer", "a", 0, MessageStatus::Delivered),
            message("m2", "peer", "b", 5, MessageStatus::Delivered),
        ],
        at(6),
    );
    rec.push_optimistic(optimistic("c", 7));
    rec.push_optimistic(optimistic("d", 8));
    rec.merge(
        vec![
            message("m1", "peer", "a", 0, MessageStatus::Delivered),
            message("m2", "peer", "b", 5, MessageStatus::Delivered),
            message("m3", "peer", "e", 6, MessageStatus::Delivered),
        ],
        at(9),
    );

    let stamps: Vec<_> = rec.rendered().iter().map(|m| m.timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(rec.rendered().len(), 5);
}

#[test]
fn pending_send_stays_before_a_newer_peer_reply() {
    setup_logging();
    let mut rec = TimelineReconciler::new(ME, ReconcilerConfig::default());

    let msg = optimistic("on my way", 10);
    let local_id = msg.id.clone();
    rec.push_optimistic(msg);
    rec.mark_sent(&local_id, at(10));

    // The peer replies before our send is confirmed; the in-flight entry
    // must not slide below the newer reply.
    rec.merge(
        vec![message("m1", "peer", "see you there", 12, MessageStatus::Delivered)],
        at(13),
    );
    let ids: Vec<&str> = rec.rendered().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![local_id.as_str(), "m1"]);
    let stamps: Vec<_> = rec.rendered().iter().map(|m| m.timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn reset_clears_everything_for_a_thread_switch() {
    setup_logging();
    let mut rec = TimelineReconciler::new(ME, ReconcilerConfig::default());
    rec.merge(
        vec![message("m1", "peer", "a", 0, MessageStatus::Delivered)],
        at(1),
    );
    rec.push_optimistic(optimistic("b", 2));
    assert_eq!(rec.rendered().len(), 2);

    rec.reset();
    assert!(rec.rendered().is_empty());
    assert_eq!(rec.pending_len(), 0);

    // The first merge after a reset adopts from scratch.
    let report = rec.merge(
        vec![message("n1", "peer", "fresh", 10, MessageStatus::Delivered)],
        at(11),
    );
    assert!(report.changed);
    assert_eq!(rec.rendered().len(), 1);
}
