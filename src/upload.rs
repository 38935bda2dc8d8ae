// Attachment upload tracking.
//
// Each submission runs in its own spawned task against the UploadService;
// failures are isolated per handle. The progress callback is owned by the
// handle: once a handle is removed from the tracked set, no further callback
// effects are observable, even if the backend keeps reporting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{ProgressFn, UploadPayload, UploadService, UploadedFile};
use crate::error::SyncError;
use crate::models::Attachment;

/// Per-item upload lifecycle: uploading (no url) -> completed | failed.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Uploading(u8),
    Completed(Attachment),
    Failed(String),
}

/// Opaque reference to one tracked upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadHandle(String);

impl UploadHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

struct UploadEntry {
    state: UploadState,
    last_pct: u8,
    on_progress: Option<ProgressFn>,
    task: Option<JoinHandle<()>>,
    /// Flips to true once the state leaves Uploading. Waiters subscribe;
    /// removing the entry drops the sender and wakes them too.
    settled: watch::Sender<bool>,
}

pub struct AttachmentPipeline {
    service: Arc<dyn UploadService>,
    entries: Arc<Mutex<HashMap<String, UploadEntry>>>,
}

impl AttachmentPipeline {
    pub fn new(service: Arc<dyn UploadService>) -> Self {
        AttachmentPipeline {
            service,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start an upload and return its handle immediately. `on_progress`
    /// observes a monotonically non-decreasing percentage in [0, 100].
    pub fn submit(&self, payload: UploadPayload, on_progress: Option<ProgressFn>) -> UploadHandle {
        let id = Uuid::new_v4().to_string();
        let name = payload.name.clone();
        let kind = payload.kind;
        let size_bytes = payload.bytes.len() as u64;
        info!("starting upload {} ({}, {} bytes)", id, name, size_bytes);

        let (settled, _) = watch::channel(false);
        lock_entries(&self.entries).insert(
            id.clone(),
            UploadEntry {
                state: UploadState::Uploading(0),
                last_pct: 0,
                on_progress,
                task: None,
                settled,
            },
        );

        let progress = Self::progress_fn(self.entries.clone(), id.clone());
        let task = tokio::spawn(Self::drive_upload(
            self.service.clone(),
            self.entries.clone(),
            id.clone(),
            name,
            kind,
            size_bytes,
            payload,
            progress,
        ));

        let mut entries = lock_entries(&self.entries);
        match entries.get_mut(&id) {
            Some(entry) => entry.task = Some(task),
            // Removed before we got here; the task has nothing to report to.
            None => task.abort(),
        }
        UploadHandle(id)
    }

    /// Stop tracking a handle. Safe before completion: the upload task is
    /// aborted and its progress callback goes silent immediately.
    pub fn remove(&self, handle: &UploadHandle) {
        let entry = lock_entries(&self.entries).remove(handle.id());
        if let Some(entry) = entry {
            if let Some(task) = entry.task {
                task.abort();
            }
            debug!("upload {} removed", handle.id());
        }
    }

    pub fn state(&self, handle: &UploadHandle) -> Option<UploadState> {
        lock_entries(&self.entries)
            .get(handle.id())
            .map(|e| e.state.clone())
    }

    /// The completed attachment with its stable URL, if the upload finished.
    pub fn attachment(&self, handle: &UploadHandle) -> Option<Attachment> {
        match self.state(handle) {
            Some(UploadState::Completed(att)) => Some(att),
            _ => None,
        }
    }

    /// Wait for one upload to settle. A handle removed mid-wait settles as
    /// failed rather than hanging.
    pub async fn wait(&self, handle: &UploadHandle) -> UploadState {
        loop {
            let (state, mut settled_rx) = {
                let map = lock_entries(&self.entries);
                match map.get(handle.id()) {
                    Some(entry) => (entry.state.clone(), entry.settled.subscribe()),
                    None => return UploadState::Failed("upload removed".to_string()),
                }
            };
            match state {
                UploadState::Uploading(_) => {
                    // A closed channel means the entry was removed; the next
                    // lookup reports that.
                    let _ = settled_rx.changed().await;
                }
                settled => return settled,
            }
        }
    }

    /// Wait for a batch, e.g. all attachments of one message being composed.
    pub async fn wait_all(&self, handles: &[UploadHandle]) -> Vec<UploadState> {
        join_all(handles.iter().map(|h| self.wait(h))).await
    }

    fn progress_fn(entries: Arc<Mutex<HashMap<String, UploadEntry>>>, id: String) -> ProgressFn {
        Arc::new(move |pct: u8| {
            let forwarded = {
                let mut map = lock_entries(&entries);
                let Some(entry) = map.get_mut(&id) else {
                    // Handle was removed; swallow the report.
                    return;
                };
                if !matches!(entry.state, UploadState::Uploading(_)) {
                    return;
                }
                let clamped = pct.min(100).max(entry.last_pct);
                entry.last_pct = clamped;
                entry.state = UploadState::Uploading(clamped);
                entry.on_progress.clone().map(|cb| (cb, clamped))
            };
            // User callback runs outside the lock.
            if let Some((cb, clamped)) = forwarded {
                cb(clamped);
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_upload(
        service: Arc<dyn UploadService>,
        entries: Arc<Mutex<HashMap<String, UploadEntry>>>,
        id: String,
        name: String,
        kind: crate::models::AttachmentKind,
        size_bytes: u64,
        payload: UploadPayload,
        progress: ProgressFn,
    ) {
        let result: Result<UploadedFile, SyncError> =
            service.upload_file(payload, progress).await;
        match result {
            Ok(file) => {
                let forwarded = {
                    let mut map = lock_entries(&entries);
                    let Some(entry) = map.get_mut(&id) else {
                        return;
                    };
                    entry.last_pct = 100;
                    entry.state = UploadState::Completed(Attachment {
                        id: id.clone(),
                        name: name.clone(),
                        kind,
                        url: Some(file.url),
                        size_bytes,
                        uploaded_at: Some(Utc::now()),
                    });
                    entry.settled.send_replace(true);
                    entry.on_progress.clone()
                };
                info!("upload {} completed", id);
                if let Some(cb) = forwarded {
                    cb(100);
                }
            }
            Err(e) => {
                error!("upload {} ({}) failed: {}", id, name, e);
                let mut map = lock_entries(&entries);
                if let Some(entry) = map.get_mut(&id) {
                    entry.state = UploadState::Failed(e.to_string());
                    entry.settled.send_replace(true);
                }
            }
        }
    }
}

fn lock_entries<'a>(
    entries: &'a Arc<Mutex<HashMap<String, UploadEntry>>>,
) -> MutexGuard<'a, HashMap<String, UploadEntry>> {
    // A poisoned lock only means a panicked callback; the map itself is
    // still coherent, so keep going.
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
