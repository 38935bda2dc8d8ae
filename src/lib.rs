// Conversation synchronization engine: optimistic timeline reconciliation
// over a polled message backend, plus the capture/upload/signal machinery
// around it. The server, storage, and notification delivery live behind the
// traits in `backend`.

pub mod backend;
pub mod error;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod recording;
pub mod session;
pub mod typing;
pub mod upload;
pub mod utils;

pub use backend::{
    MessageStore, NotificationIntent, NotificationSink, ProgressFn, ThreadDirectory,
    UploadPayload, UploadService, UploadedFile,
};
pub use error::SyncError;
pub use models::{Attachment, AttachmentKind, Message, MessageStatus, RecordingState, Thread};
pub use notify::NotificationBridge;
pub use reconcile::{MergeReport, ReconcilerConfig, TimelineReconciler};
pub use recording::{CaptureDevice, CaptureHandle, RecordingController};
pub use session::{PollPolicy, ScrollHint, SessionConfig, SessionEvent, ThreadSession};
pub use typing::{TypingEstimate, TypingSignalEstimator};
pub use upload::{AttachmentPipeline, UploadHandle, UploadState};
