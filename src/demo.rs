// In-memory scripted backend for the demo binary. Remote messages are
// released on a schedule relative to startup, so successive polls see a
// growing authoritative snapshot without any server.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use log::info;
use serde::Deserialize;
use uuid::Uuid;

use confab::backend::{MessageStore, NotificationIntent, NotificationSink, ThreadDirectory};
use confab::error::SyncError;
use confab::models::{Attachment, Message, MessageStatus, Thread};

pub const MAINTAINER_ID: &str = "maintainer";
pub const LOCAL_USER: &str = "demo-user";

const SCRIPT: &str = r#"[
    { "after_ms": 0,     "content": "Hi! This is the support line, how can I help?" },
    { "after_ms": 3500,  "content": "Take your time, I am around." },
    { "after_ms": 7000,  "content": "Did my last answer make sense?" },
    { "after_ms": 10500, "content": "I will mark this resolved in a bit unless you reply." }
]"#;

#[derive(Debug, Deserialize)]
struct ScriptedMessage {
    after_ms: u64,
    content: String,
}

pub struct DemoBackend {
    started: DateTime<Utc>,
    script: Vec<ScriptedMessage>,
    sent: Mutex<Vec<Message>>,
}

impl DemoBackend {
    pub fn new() -> anyhow::Result<Self> {
        let script: Vec<ScriptedMessage> = serde_json::from_str(SCRIPT)?;
        Ok(DemoBackend {
            started: Utc::now(),
            script,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn maintainer(&self) -> Thread {
        Thread {
            id: MAINTAINER_ID.to_string(),
            participant_id: "support-1".to_string(),
            participant_name: "Support".to_string(),
            last_message: String::new(),
            last_message_timestamp: self.started,
            unread_count: 0,
            is_online: true,
        }
    }

    fn released(&self) -> Vec<Message> {
        let now = Utc::now();
        self.script
            .iter()
            .enumerate()
            .filter_map(|(idx, scripted)| {
                let at = self.started + TimeDelta::milliseconds(scripted.after_ms as i64);
                (at <= now).then(|| Message {
                    id: format!("remote-{}", idx),
                    thread_id: MAINTAINER_ID.to_string(),
                    sender_id: "support-1".to_string(),
                    sender_name: "Support".to_string(),
                    content: scripted.content.clone(),
                    timestamp: at,
                    status: MessageStatus::Delivered,
                    attachments: Vec::new(),
                    audio_url: None,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ThreadDirectory for DemoBackend {
    async fn get_threads(&self) -> Result<Vec<Thread>, SyncError> {
        Ok(vec![self.maintainer()])
    }

    async fn get_maintainer_thread(&self) -> Result<Thread, SyncError> {
        Ok(self.maintainer())
    }
}

#[async_trait]
impl MessageStore for DemoBackend {
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, SyncError> {
        if thread_id != MAINTAINER_ID {
            return Err(SyncError::Transport(format!(
                "unknown thread {}",
                thread_id
            )));
        }
        let mut messages = self.released();
        messages.extend(self.sent.lock().map_err(|e| SyncError::transport(e))?.clone());
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
        attachments: Vec<Attachment>,
        audio_url: Option<String>,
    ) -> Result<Message, SyncError> {
        let message = Message {
            id: format!("srv-{}", Uuid::new_v4()),
            thread_id: thread_id.to_string(),
            sender_id: LOCAL_USER.to_string(),
            sender_name: "You".to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
            attachments,
            audio_url,
        };
        self.sent
            .lock()
            .map_err(|e| SyncError::transport(e))?
            .push(message.clone());
        Ok(message)
    }
}

pub struct PrintSink;

impl NotificationSink for PrintSink {
    fn deliver(&self, intent: NotificationIntent) {
        info!("notification: {}: {}", intent.sender_name, intent.preview);
        println!("  [notification] {}: {}", intent.sender_name, intent.preview);
    }
}
