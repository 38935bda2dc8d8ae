use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery progression for a timeline message.
///
/// A locally composed message starts at `Pending` and advances only forward
/// (Pending -> Sent -> Delivered -> Read). `Failed` is terminal and is only
/// ever set by an explicit send failure, never by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Rank used to enforce forward-only progression. Failed sits outside
    /// the progression and never participates in upgrades.
    pub fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Document,
    Audio,
}

/// A binary attachment referenced by a message.
///
/// `url` is only present once the upload completed; an attachment without a
/// url is still uploading (or failed and about to be discarded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub kind: AttachmentKind,
    pub url: Option<String>,
    pub size_bytes: u64,
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub attachments: Vec<Attachment>,
    pub audio_url: Option<String>,
}

impl Message {
    /// Build a locally composed optimistic message. The `local-` prefixed id
    /// is temporary and gets replaced by the server id on reconciliation.
    pub fn compose(
        thread_id: &str,
        sender_id: &str,
        sender_name: &str,
        content: &str,
        attachments: Vec<Attachment>,
        audio_url: Option<String>,
    ) -> Self {
        Message {
            id: format!("local-{}", Uuid::new_v4()),
            thread_id: thread_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            status: MessageStatus::Pending,
            attachments,
            audio_url,
        }
    }

    /// True when this message still carries a temporary local id.
    pub fn has_local_id(&self) -> bool {
        self.id.starts_with("local-")
    }
}

/// One conversation as listed by the thread directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub participant_id: String,
    pub participant_name: String,
    pub last_message: String,
    pub last_message_timestamp: DateTime<Utc>,
    pub unread_count: u32,
    pub is_online: bool,
}

/// Observable phase of the voice capture state machine. Cancel lands back
/// in `Idle`; there is no separate canceled phase to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopped,
}
