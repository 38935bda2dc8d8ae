// Timeline reconciliation: merging a freshly polled authoritative snapshot
// with locally pending optimistic messages.
//
// This is a pure reducer over {server snapshot, pending set} -> rendered
// timeline. It performs no I/O and takes `now` as a parameter, so every
// merge decision is unit-testable without a backend or a clock.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration as TimeDelta, Utc};
use log::{debug, warn};

use crate::models::{Message, MessageStatus};

/// Tuning knobs for the merge and the simulated status progression.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Span within which an optimistic and a confirmed message are
    /// considered the same logical message.
    pub tolerance: TimeDelta,
    /// Snapshot adoptions an optimistic entry survives unmatched before we
    /// stop trying to match it. It stays rendered as in-flight either way.
    pub max_unmatched_merges: u32,
    /// Simulated sent -> delivered delay, measured from the send succeeding.
    pub delivered_after: TimeDelta,
    /// Simulated delivered -> read delay, on top of `delivered_after`.
    pub read_after: TimeDelta,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            tolerance: TimeDelta::seconds(10),
            max_unmatched_merges: 5,
            delivered_after: TimeDelta::seconds(1),
            read_after: TimeDelta::seconds(2),
        }
    }
}

/// Outcome of one merge: whether the rendered timeline changed, and which
/// snapshot messages are remotely authored and new since the prior snapshot
/// (the input for typing/notification signals).
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub changed: bool,
    pub new_remote: Vec<Message>,
}

struct OptimisticSend {
    message: Message,
    sent_at: DateTime<Utc>,
    unmatched_merges: u32,
    matchable: bool,
}

pub struct TimelineReconciler {
    config: ReconcilerConfig,
    local_sender_id: String,
    /// The last adopted authoritative snapshot, used for divergence checks.
    last_snapshot: Vec<Message>,
    /// What the UI renders: adopted snapshot plus unconfirmed optimistic
    /// entries in FIFO order.
    rendered: Vec<Message>,
    pending: VecDeque<OptimisticSend>,
    /// When each locally sent message reached Sent, keyed by current id.
    /// Drives the simulated delivered/read progression.
    sent_clock: HashMap<String, DateTime<Utc>>,
}

impl TimelineReconciler {
    pub fn new(local_sender_id: &str, config: ReconcilerConfig) -> Self {
        TimelineReconciler {
            config,
            local_sender_id: local_sender_id.to_string(),
            last_snapshot: Vec::new(),
            rendered: Vec::new(),
            pending: VecDeque::new(),
            sent_clock: HashMap::new(),
        }
    }

    pub fn rendered(&self) -> &[Message] {
        &self.rendered
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append a freshly composed message ahead of server confirmation.
    /// Visible to the very next merge.
    pub fn push_optimistic(&mut self, message: Message) {
        debug!("appending optimistic message {} to timeline", message.id);
        self.pending.push_back(OptimisticSend {
            sent_at: message.timestamp,
            message: message.clone(),
            unmatched_merges: 0,
            matchable: true,
        });
        self.rendered.push(message);
    }

    /// The send call succeeded: advance the optimistic entry to Sent and
    /// start its simulated progression clock.
    pub fn mark_sent(&mut self, local_id: &str, now: DateTime<Utc>) -> bool {
        let mut found = false;
        if let Some(entry) = self.pending.iter_mut().find(|e| e.message.id == local_id) {
            entry.message.status = MessageStatus::Sent;
            found = true;
        }
        if let Some(msg) = self.rendered.iter_mut().find(|m| m.id == local_id) {
            msg.status = MessageStatus::Sent;
            found = true;
        }
        if found {
            self.sent_clock.insert(local_id.to_string(), now);
        }
        found
    }

    /// The send call failed: remove the optimistic entry entirely. Nothing
    /// of it (entry, progress, simulation clock) survives.
    pub fn drop_optimistic(&mut self, local_id: &str) -> bool {
        let before = self.rendered.len();
        self.pending.retain(|e| e.message.id != local_id);
        self.rendered.retain(|m| m.id != local_id);
        self.sent_clock.remove(local_id);
        self.rendered.len() != before
    }

    /// Full timeline reset on thread switch.
    pub fn reset(&mut self) {
        self.last_snapshot.clear();
        self.rendered.clear();
        self.pending.clear();
        self.sent_clock.clear();
    }

    /// Merge a polled snapshot against the current state.
    ///
    /// An identical snapshot (same length, element-wise equal on id, status,
    /// content, timestamp) is an idempotent no-op. A diverged snapshot is
    /// adopted wholesale, then unconfirmed optimistic entries are folded in:
    /// an entry matching (sender, content, attachment set) within the
    /// tolerance window replaces itself with the confirmed message, earliest
    /// first when several candidates share identical content.
    pub fn merge(&mut self, snapshot: Vec<Message>, now: DateTime<Utc>) -> MergeReport {
        if !self.snapshot_diverged(&snapshot) {
            debug!(
                "poll returned identical snapshot ({} messages), keeping timeline",
                snapshot.len()
            );
            return MergeReport {
                changed: false,
                new_remote: Vec::new(),
            };
        }

        let prior_ids: HashSet<&str> =
            self.last_snapshot.iter().map(|m| m.id.as_str()).collect();
        let new_remote: Vec<Message> = snapshot
            .iter()
            .filter(|m| m.sender_id != self.local_sender_id && !prior_ids.contains(m.id.as_str()))
            .cloned()
            .collect();

        // Adopt the snapshot in timestamp order; the stable sort preserves
        // arrival order for ties.
        let mut adopted = snapshot.clone();
        adopted.sort_by_key(|m| m.timestamp);

        // Fold optimistic entries in FIFO order. Each snapshot entry may be
        // claimed once, so two rapid sends of identical content confirm two
        // distinct messages instead of collapsing into one.
        let mut consumed = vec![false; adopted.len()];
        let mut still_pending = VecDeque::new();
        while let Some(mut entry) = self.pending.pop_front() {
            let matched = if entry.matchable {
                Self::find_confirmation(
                    &adopted,
                    &consumed,
                    &entry,
                    &self.local_sender_id,
                    self.config.tolerance,
                )
            } else {
                None
            };
            match matched {
                Some(idx) => {
                    consumed[idx] = true;
                    debug!(
                        "optimistic message {} confirmed as {}",
                        entry.message.id, adopted[idx].id
                    );
                    // Carry the simulation clock over to the server id.
                    if let Some(since) = self.sent_clock.remove(&entry.message.id) {
                        self.sent_clock.entry(adopted[idx].id.clone()).or_insert(since);
                    }
                }
                None => {
                    entry.unmatched_merges += 1;
                    if entry.matchable && entry.unmatched_merges >= self.config.max_unmatched_merges
                    {
                        warn!(
                            "optimistic message {} unmatched after {} merges, keeping it in-flight",
                            entry.message.id, entry.unmatched_merges
                        );
                        entry.matchable = false;
                    }
                    still_pending.push_back(entry);
                }
            }
        }
        self.pending = still_pending;

        // Retained pending entries go back in at their timestamp-sorted
        // position. The upper-bound insert keeps FIFO order for entries
        // sharing a timestamp.
        let mut rendered = adopted;
        for entry in &self.pending {
            let idx = rendered.partition_point(|m| m.timestamp <= entry.message.timestamp);
            rendered.insert(idx, entry.message.clone());
        }

        // Any locally authored Sent message in the adopted snapshot gets a
        // simulation clock if it does not have one yet.
        for msg in &rendered {
            if msg.sender_id == self.local_sender_id && msg.status == MessageStatus::Sent {
                self.sent_clock.entry(msg.id.clone()).or_insert(now);
            }
        }

        self.last_snapshot = snapshot;
        self.rendered = rendered;
        MergeReport {
            changed: true,
            new_remote,
        }
    }

    /// Optimistic sent -> delivered -> read progression for locally sent
    /// messages the server has not acknowledged further yet. Only ever
    /// raises a status; an authoritative snapshot status is never lowered
    /// here, and the next adoption overrides whatever was simulated.
    pub fn tick_simulation(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for msg in self.rendered.iter_mut() {
            if msg.sender_id != self.local_sender_id || msg.status == MessageStatus::Failed {
                continue;
            }
            let Some(since) = self.sent_clock.get(&msg.id).copied() else {
                continue;
            };
            if msg.status.rank() < MessageStatus::Sent.rank() {
                continue;
            }
            let elapsed = now - since;
            let target = if elapsed >= self.config.delivered_after + self.config.read_after {
                MessageStatus::Read
            } else if elapsed >= self.config.delivered_after {
                MessageStatus::Delivered
            } else {
                continue;
            };
            if target.rank() > msg.status.rank() {
                debug!("simulating {:?} for message {}", target, msg.id);
                msg.status = target;
                changed = true;
            }
        }
        if changed {
            // Keep the pending copies in step so a later re-append does not
            // revive a stale status.
            for entry in self.pending.iter_mut() {
                if let Some(msg) = self.rendered.iter().find(|m| m.id == entry.message.id) {
                    entry.message.status = msg.status;
                }
            }
        }
        changed
    }

    fn snapshot_diverged(&self, snapshot: &[Message]) -> bool {
        if snapshot.len() != self.last_snapshot.len() {
            return true;
        }
        snapshot.iter().zip(self.last_snapshot.iter()).any(|(a, b)| {
            a.id != b.id
                || a.status != b.status
                || a.content != b.content
                || a.timestamp != b.timestamp
        })
    }

    fn find_confirmation(
        adopted: &[Message],
        consumed: &[bool],
        entry: &OptimisticSend,
        local_sender_id: &str,
        tolerance: TimeDelta,
    ) -> Option<usize> {
        adopted.iter().enumerate().position(|(idx, msg)| {
            !consumed[idx]
                && msg.sender_id == local_sender_id
                && msg.content == entry.message.content
                && attachment_names(msg) == attachment_names(&entry.message)
                && within_tolerance(msg.timestamp, entry.sent_at, tolerance)
        })
    }
}

fn within_tolerance(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: TimeDelta) -> bool {
    let delta = if a >= b { a - b } else { b - a };
    delta <= tolerance
}

fn attachment_names(msg: &Message) -> Vec<&str> {
    let mut names: Vec<&str> = msg.attachments.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    names
}
