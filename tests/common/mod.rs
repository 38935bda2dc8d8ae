// Shared fixtures for the integration tests: an in-memory backend with
// scriptable snapshots and failure injection, plus mock capture and upload
// doubles.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::Receiver;
use tokio::time::{timeout, Duration};

use confab::backend::{
    MessageStore, NotificationIntent, NotificationSink, ProgressFn, ThreadDirectory,
    UploadPayload, UploadService, UploadedFile,
};
use confab::error::SyncError;
use confab::models::{Attachment, Message, MessageStatus, Thread};
use confab::recording::{CaptureDevice, CaptureHandle};
use confab::session::SessionEvent;

pub const LOCAL_ID: &str = "me";
pub const LOCAL_NAME: &str = "Me";
pub const PEER_ID: &str = "peer-1";
pub const MAINTAINER_THREAD: &str = "maintainer";

static INIT_LOGGER: Once = Once::new();

pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = confab::utils::setup_logging(None, log::LevelFilter::Debug);
    });
}

pub fn make_thread(id: &str, participant_name: &str) -> Thread {
    Thread {
        id: id.to_string(),
        participant_id: PEER_ID.to_string(),
        participant_name: participant_name.to_string(),
        last_message: String::new(),
        last_message_timestamp: Utc::now(),
        unread_count: 0,
        is_online: true,
    }
}

pub fn remote_message(thread_id: &str, id: &str, content: &str, timestamp: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        sender_id: PEER_ID.to_string(),
        sender_name: "Peer".to_string(),
        content: content.to_string(),
        timestamp,
        status: MessageStatus::Delivered,
        attachments: Vec::new(),
        audio_url: None,
    }
}

/// In-memory stand-in for the thread directory and message store, with
/// per-thread snapshots, injectable failures, and configurable response
/// delays for racing a poll against a thread switch.
pub struct MemoryBackend {
    maintainer: Thread,
    threads: Mutex<Vec<Thread>>,
    snapshots: Mutex<HashMap<String, Vec<Message>>>,
    poll_delays: Mutex<HashMap<String, Duration>>,
    pub fail_sends: AtomicBool,
    pub fail_polls: AtomicBool,
    /// When set, an accepted send is also appended to the authoritative
    /// snapshot, so the next poll confirms it under a server id.
    pub confirm_sends: AtomicBool,
    send_seq: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let maintainer = make_thread(MAINTAINER_THREAD, "Support");
        Arc::new(MemoryBackend {
            threads: Mutex::new(vec![maintainer.clone()]),
            maintainer,
            snapshots: Mutex::new(HashMap::new()),
            poll_delays: Mutex::new(HashMap::new()),
            fail_sends: AtomicBool::new(false),
            fail_polls: AtomicBool::new(false),
            confirm_sends: AtomicBool::new(true),
            send_seq: AtomicUsize::new(0),
        })
    }

    pub fn add_thread(&self, thread: Thread) {
        self.threads.lock().unwrap().push(thread);
    }

    pub fn set_snapshot(&self, thread_id: &str, messages: Vec<Message>) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), messages);
    }

    pub fn push_remote(&self, thread_id: &str, id: &str, content: &str) -> Message {
        let message = remote_message(thread_id, id, content, Utc::now());
        self.snapshots
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    pub fn set_poll_delay(&self, thread_id: &str, delay: Duration) {
        self.poll_delays
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), delay);
    }

    pub fn snapshot_len(&self, thread_id: &str) -> usize {
        self.snapshots
            .lock()
            .unwrap()
            .get(thread_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ThreadDirectory for MemoryBackend {
    async fn get_threads(&self) -> Result<Vec<Thread>, SyncError> {
        Ok(self.threads.lock().unwrap().clone())
    }

    async fn get_maintainer_thread(&self) -> Result<Thread, SyncError> {
        Ok(self.maintainer.clone())
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, SyncError> {
        let delay = self.poll_delays.lock().unwrap().get(thread_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("simulated poll failure".to_string()));
        }
        let mut snapshot = self
            .snapshots
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        snapshot.sort_by_key(|m| m.timestamp);
        Ok(snapshot)
    }

    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
        attachments: Vec<Attachment>,
        audio_url: Option<String>,
    ) -> Result<Message, SyncError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("simulated send failure".to_string()));
        }
        let seq = self.send_seq.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id: format!("srv-{}", seq),
            thread_id: thread_id.to_string(),
            sender_id: LOCAL_ID.to_string(),
            sender_name: LOCAL_NAME.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
            attachments,
            audio_url,
        };
        if self.confirm_sends.load(Ordering::SeqCst) {
            self.snapshots
                .lock()
                .unwrap()
                .entry(thread_id.to_string())
                .or_default()
                .push(message.clone());
        }
        Ok(message)
    }
}

pub struct CountingSink {
    pub intents: Mutex<Vec<NotificationIntent>>,
}

impl CountingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(CountingSink {
            intents: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.intents.lock().unwrap().len()
    }
}

impl NotificationSink for CountingSink {
    fn deliver(&self, intent: NotificationIntent) {
        self.intents.lock().unwrap().push(intent);
    }
}

/// Receive events until one matches, with a deadline.
pub async fn wait_for_event<F>(
    rx: &mut Receiver<SessionEvent>,
    secs: u64,
    mut pred: F,
) -> Result<SessionEvent>
where
    F: FnMut(&SessionEvent) -> bool,
{
    let deadline = Duration::from_secs(secs);
    timeout(deadline, async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return Ok(event),
                Some(_) => continue,
                None => return Err(anyhow!("event channel closed")),
            }
        }
    })
    .await
    .map_err(|_| anyhow!("no matching event within {:?}", deadline))?
}

/// Wait for a timeline update whose message list satisfies the predicate.
pub async fn wait_for_timeline<F>(
    rx: &mut Receiver<SessionEvent>,
    secs: u64,
    mut pred: F,
) -> Result<Vec<Message>>
where
    F: FnMut(&[Message]) -> bool,
{
    let event = wait_for_event(rx, secs, |event| {
        matches!(event, SessionEvent::TimelineUpdated { messages, .. } if pred(messages))
    })
    .await?;
    match event {
        SessionEvent::TimelineUpdated { messages, .. } => Ok(messages),
        _ => unreachable!(),
    }
}

/// Capture device double that counts acquisitions and releases.
pub struct MockDevice {
    pub fail: AtomicBool,
    pub opens: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(MockDevice {
            fail: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl CaptureDevice for MockDevice {
    fn open(&self) -> Result<Box<dyn CaptureHandle>, SyncError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Device("permission denied".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            releases: self.releases.clone(),
        }))
    }
}

pub struct MockHandle {
    releases: Arc<AtomicUsize>,
}

impl CaptureHandle for MockHandle {
    fn finalize(&mut self) -> Vec<u8> {
        vec![0xAu8, 0xB, 0xC]
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Upload backend double that replays a progress sequence and can be told
/// to reject specific payload names.
pub struct MockUploader {
    pub steps: Vec<u8>,
    pub step_delay: Duration,
    pub fail_names: Mutex<HashSet<String>>,
}

impl MockUploader {
    pub fn new(steps: Vec<u8>) -> Arc<Self> {
        Arc::new(MockUploader {
            steps,
            step_delay: Duration::from_millis(10),
            fail_names: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_for(&self, name: &str) {
        self.fail_names.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl UploadService for MockUploader {
    async fn upload_file(
        &self,
        payload: UploadPayload,
        on_progress: ProgressFn,
    ) -> Result<UploadedFile, SyncError> {
        for pct in &self.steps {
            tokio::time::sleep(self.step_delay).await;
            on_progress(*pct);
        }
        if self.fail_names.lock().unwrap().contains(&payload.name) {
            return Err(SyncError::Upload {
                name: payload.name,
                reason: "backend rejected".to_string(),
            });
        }
        Ok(UploadedFile {
            url: format!("https://files.test/{}", payload.name),
        })
    }
}
