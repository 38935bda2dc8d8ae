// Collaborator contracts consumed by the engine. The server side, durable
// storage, and the actual notification delivery all live behind these traits;
// the engine rebuilds the timeline from MessageStore on every activation and
// persists nothing itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::{Attachment, AttachmentKind, Message, Thread};

/// Directory of available conversations. The maintainer thread is a
/// distinguished, always-available conversation used as the default
/// selection.
#[async_trait]
pub trait ThreadDirectory: Send + Sync {
    async fn get_threads(&self) -> Result<Vec<Thread>, SyncError>;
    async fn get_maintainer_thread(&self) -> Result<Thread, SyncError>;
}

/// Authoritative message backend. `get_messages` returns the full snapshot
/// for a thread; there is no push transport, so the engine polls it.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, SyncError>;

    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
        attachments: Vec<Attachment>,
        audio_url: Option<String>,
    ) -> Result<Message, SyncError>;
}

/// Raw bytes handed to the upload backend.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub name: String,
    pub kind: AttachmentKind,
    pub bytes: Vec<u8>,
}

/// Result of a completed upload: a stable URL usable as an attachment
/// reference.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub url: String,
}

/// Progress callback invoked by the upload backend with a percentage in
/// [0, 100]. The backend makes no monotonicity promise; the pipeline clamps.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Black-box async upload backend.
#[async_trait]
pub trait UploadService: Send + Sync {
    async fn upload_file(
        &self,
        payload: UploadPayload,
        on_progress: ProgressFn,
    ) -> Result<UploadedFile, SyncError>;
}

/// A background-notification decision produced by the engine. Actual
/// delivery is out of scope; the sink consumes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub sender_name: String,
    pub preview: String,
}

/// Consumer of notification intents.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, intent: NotificationIntent);
}
