// Background-notification decisions derived from reconciled timeline deltas.

use std::sync::Arc;

use log::debug;

use crate::backend::{NotificationIntent, NotificationSink};
use crate::models::Message;

/// Longest preview carried in a notification intent, in characters.
const PREVIEW_LIMIT: usize = 100;

pub struct NotificationBridge {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationBridge {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        NotificationBridge { sink }
    }

    /// Emit an intent for every newly reconciled remote message, unless the
    /// thread view is foregrounded. Local messages never notify. Returns
    /// how many intents were delivered to the sink.
    pub fn observe(
        &self,
        new_remote: &[Message],
        local_sender_id: &str,
        foregrounded: bool,
    ) -> usize {
        if foregrounded {
            return 0;
        }
        let mut delivered = 0;
        for msg in new_remote {
            if msg.sender_id == local_sender_id {
                continue;
            }
            let intent = NotificationIntent {
                sender_name: msg.sender_name.clone(),
                preview: truncate_preview(&msg.content),
            };
            debug!("notification intent for message {} from {}", msg.id, msg.sender_name);
            self.sink.deliver(intent);
            delivered += 1;
        }
        delivered
    }
}

/// Truncate to at most PREVIEW_LIMIT characters, appending an ellipsis.
/// Counts chars rather than bytes so multi-byte content never splits.
fn truncate_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_LIMIT {
        return content.to_string();
    }
    let mut preview: String = content.chars().take(PREVIEW_LIMIT).collect();
    preview.push('…');
    preview
}
