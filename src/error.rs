use thiserror::Error;

/// Error taxonomy for the synchronization engine.
///
/// None of these are fatal: every variant is caught at an operation boundary
/// and surfaced as a user-visible notification. Polling continues on the
/// next tick, uploads fail independently, and the rendered timeline is
/// never corrupted by a failed operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A poll or send failed at the transport level. Non-blocking; the
    /// next tick retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// One attachment upload failed. Other uploads are unaffected.
    #[error("upload of '{name}' failed: {reason}")]
    Upload { name: String, reason: String },

    /// Microphone permission or hardware failure. Recording aborts and the
    /// controller returns to idle.
    #[error("capture device unavailable: {0}")]
    Device(String),

    /// A send with no content, attachments, or audio. Rejected before any
    /// network call is made.
    #[error("message needs text, an attachment, or a voice recording")]
    EmptyMessage,
}

impl SyncError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        SyncError::Transport(err.to_string())
    }
}
