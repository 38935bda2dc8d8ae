// Typing indicator inferred from message recency.
//
// There is no presence channel in this environment, so "typing" is a
// heuristic: the remote participant is considered active for a short window
// after their newest message. This estimator is deliberately isolated so a
// real presence feed could replace it without touching the reconciler.

use chrono::{DateTime, Duration as TimeDelta, Utc};

use crate::models::Message;

const DEFAULT_WINDOW_SECS: i64 = 3;

/// What the estimator concluded, plus how long the signal stays valid so
/// the caller can schedule its self-expiry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypingEstimate {
    pub active: bool,
    pub expires_in: Option<std::time::Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct TypingSignalEstimator {
    window: TimeDelta,
}

impl Default for TypingSignalEstimator {
    fn default() -> Self {
        TypingSignalEstimator {
            window: TimeDelta::seconds(DEFAULT_WINDOW_SECS),
        }
    }
}

impl TypingSignalEstimator {
    pub fn with_window(window: TimeDelta) -> Self {
        TypingSignalEstimator { window }
    }

    /// Estimate from the newest timeline message. Unconditionally inactive
    /// when the newest message is locally authored or the timeline is empty.
    pub fn estimate(
        &self,
        newest: Option<&Message>,
        local_sender_id: &str,
        now: DateTime<Utc>,
    ) -> TypingEstimate {
        let inactive = TypingEstimate {
            active: false,
            expires_in: None,
        };
        let Some(msg) = newest else {
            return inactive;
        };
        if msg.sender_id == local_sender_id {
            return inactive;
        }
        let age = now - msg.timestamp;
        if age < TimeDelta::zero() || age >= self.window {
            return inactive;
        }
        let remaining = (self.window - age)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        TypingEstimate {
            active: true,
            expires_in: Some(remaining),
        }
    }
}
