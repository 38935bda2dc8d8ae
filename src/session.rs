// One active conversation bound to a polling loop.
//
// There is no push transport; the session polls the message store on a fixed
// interval and feeds every snapshot through the reconciler. Exactly one poll
// loop runs at a time: switching threads bumps a generation counter and
// aborts the previous loop, and any in-flight response stamped with an old
// generation is discarded instead of merged.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::backend::{MessageStore, NotificationSink, ThreadDirectory};
use crate::error::SyncError;
use crate::models::{Attachment, Message, Thread};
use crate::notify::NotificationBridge;
use crate::reconcile::{ReconcilerConfig, TimelineReconciler};
use crate::typing::TypingSignalEstimator;

/// Explicit scheduling policy for the pseudo-realtime poll. Fixed interval
/// plus a little jitter, with a backoff after transport errors.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub jitter: Duration,
    pub error_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_secs(2),
            jitter: Duration::from_millis(250),
            error_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub local_sender_id: String,
    pub local_sender_name: String,
    pub poll: PollPolicy,
    pub reconciler: ReconcilerConfig,
    pub typing: TypingSignalEstimator,
    /// Capacity of the event channel to the UI.
    pub event_buffer: usize,
}

impl SessionConfig {
    pub fn new(local_sender_id: &str, local_sender_name: &str) -> Self {
        SessionConfig {
            local_sender_id: local_sender_id.to_string(),
            local_sender_name: local_sender_name.to_string(),
            poll: PollPolicy::default(),
            reconciler: ReconcilerConfig::default(),
            typing: TypingSignalEstimator::default(),
            event_buffer: 64,
        }
    }
}

/// What the UI should do with its scroll position after a timeline update.
/// The first load of a thread and mutation-only updates (status changes)
/// never scroll; a growing message count scrolls to the latest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollHint {
    None,
    ToLatest,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ThreadSelected(Thread),
    TimelineUpdated {
        messages: Vec<Message>,
        scroll: ScrollHint,
    },
    Typing(bool),
    Error(String),
}

struct SessionState {
    active_thread: Option<Thread>,
    threads: Vec<Thread>,
    reconciler: TimelineReconciler,
    first_load_done: bool,
    last_rendered_len: usize,
    typing_active: bool,
}

struct SessionCtx {
    store: Arc<dyn MessageStore>,
    bridge: NotificationBridge,
    typing: TypingSignalEstimator,
    policy: PollPolicy,
    local_sender_id: String,
    local_sender_name: String,
    state: TokioMutex<SessionState>,
    /// Bumped on every thread switch and on shutdown. Poll responses carry
    /// the generation they were issued under; a mismatch means discard.
    generation: AtomicU64,
    foreground: AtomicBool,
    events: mpsc::Sender<SessionEvent>,
}

pub struct ThreadSession {
    directory: Arc<dyn ThreadDirectory>,
    ctx: Arc<SessionCtx>,
    poll_task: Option<JoinHandle<()>>,
}

impl ThreadSession {
    pub fn new(
        directory: Arc<dyn ThreadDirectory>,
        store: Arc<dyn MessageStore>,
        sink: Arc<dyn NotificationSink>,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let ctx = Arc::new(SessionCtx {
            store,
            bridge: NotificationBridge::new(sink),
            typing: config.typing,
            policy: config.poll,
            local_sender_id: config.local_sender_id.clone(),
            local_sender_name: config.local_sender_name,
            state: TokioMutex::new(SessionState {
                active_thread: None,
                threads: Vec::new(),
                reconciler: TimelineReconciler::new(&config.local_sender_id, config.reconciler),
                first_load_done: false,
                last_rendered_len: 0,
                typing_active: false,
            }),
            generation: AtomicU64::new(0),
            foreground: AtomicBool::new(true),
            events,
        });
        (
            ThreadSession {
                directory,
                ctx,
                poll_task: None,
            },
            event_rx,
        )
    }

    /// Mount the session: priority-fetch the maintainer thread, load the
    /// directory, and select the requested thread when it is known, the
    /// maintainer otherwise, or the first available thread as a last resort.
    pub async fn activate(&mut self, requested: Option<&str>) -> Result<Thread, SyncError> {
        let maintainer = match self.directory.get_maintainer_thread().await {
            Ok(thread) => Some(thread),
            Err(e) => {
                warn!("maintainer thread unavailable: {}", e);
                None
            }
        };
        let mut threads = match self.directory.get_threads().await {
            Ok(threads) => threads,
            Err(e) => {
                warn!("thread directory unavailable: {}", e);
                Vec::new()
            }
        };
        if let Some(m) = &maintainer {
            if !threads.iter().any(|t| t.id == m.id) {
                threads.insert(0, m.clone());
            }
        }
        let chosen = requested
            .and_then(|id| threads.iter().find(|t| t.id == id).cloned())
            .or_else(|| maintainer.clone())
            .or_else(|| threads.first().cloned())
            .ok_or_else(|| SyncError::Transport("no threads available".to_string()))?;
        if requested.is_some() && requested != Some(chosen.id.as_str()) {
            info!(
                "requested thread {:?} unknown, falling back to {}",
                requested, chosen.id
            );
        }
        {
            let mut st = self.ctx.state.lock().await;
            st.threads = threads;
        }
        self.select_thread(&chosen.id).await
    }

    /// Switch the active conversation. The previous poll loop is fully
    /// canceled before the new one starts, the timeline is reset, an
    /// immediate fetch runs, and then interval polling takes over.
    pub async fn select_thread(&mut self, thread_id: &str) -> Result<Thread, SyncError> {
        let my_gen = self.ctx.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }

        let thread = self.lookup_thread(thread_id).await?;
        {
            let mut st = self.ctx.state.lock().await;
            st.reconciler.reset();
            st.first_load_done = false;
            st.last_rendered_len = 0;
            st.typing_active = false;
            st.active_thread = Some(thread.clone());
            if let Some(t) = st.threads.iter_mut().find(|t| t.id == thread.id) {
                t.unread_count = 0;
            }
        }
        info!("thread {} selected", thread.id);
        self.ctx
            .send_event(SessionEvent::ThreadSelected(thread.clone()))
            .await;

        // Immediate fetch; a failure here is non-fatal, the loop retries.
        if let Err(e) = self.load_initial_messages(&thread.id).await {
            warn!("initial load for thread {} failed: {}", thread.id, e);
        }

        let ctx = self.ctx.clone();
        let tid = thread.id.clone();
        self.poll_task = Some(tokio::spawn(async move {
            SessionCtx::poll_loop(ctx, tid, my_gen).await;
        }));
        Ok(thread)
    }

    /// One fetch-and-merge for a thread, outside the interval. This is the
    /// first load after selection, so it never triggers auto-scroll.
    pub async fn load_initial_messages(&self, thread_id: &str) -> Result<(), SyncError> {
        let my_gen = self.ctx.generation.load(Ordering::SeqCst);
        match self.ctx.store.get_messages(thread_id).await {
            Ok(snapshot) => {
                self.ctx.apply_snapshot(my_gen, snapshot).await;
                Ok(())
            }
            Err(e) => {
                self.ctx
                    .send_event(SessionEvent::Error(format!(
                        "could not load messages: {}",
                        e
                    )))
                    .await;
                Err(e)
            }
        }
    }

    /// Optimistic send: the message appears in the timeline immediately and
    /// is folded into the next authoritative snapshot. A transport failure
    /// removes the optimistic entry entirely and surfaces an error.
    pub async fn send_message(
        &self,
        content: &str,
        attachments: Vec<Attachment>,
        audio_url: Option<String>,
    ) -> Result<(), SyncError> {
        if content.trim().is_empty() && attachments.is_empty() && audio_url.is_none() {
            return Err(SyncError::EmptyMessage);
        }
        let ctx = &self.ctx;
        let (thread_id, local_id, optimistic) = {
            let mut st = ctx.state.lock().await;
            let thread = st
                .active_thread
                .clone()
                .ok_or_else(|| SyncError::Transport("no active thread".to_string()))?;
            let msg = Message::compose(
                &thread.id,
                &ctx.local_sender_id,
                &ctx.local_sender_name,
                content,
                attachments.clone(),
                audio_url.clone(),
            );
            let local_id = msg.id.clone();
            st.reconciler.push_optimistic(msg);
            st.last_rendered_len = st.reconciler.rendered().len();
            let event = SessionEvent::TimelineUpdated {
                messages: st.reconciler.rendered().to_vec(),
                scroll: ScrollHint::ToLatest,
            };
            (thread.id, local_id, event)
        };
        ctx.send_event(optimistic).await;

        match ctx
            .store
            .send_message(&thread_id, content, attachments, audio_url)
            .await
        {
            Ok(server_msg) => {
                debug!("send accepted, server id {}", server_msg.id);
                let event = {
                    let mut st = ctx.state.lock().await;
                    if st.reconciler.mark_sent(&local_id, Utc::now()) {
                        Some(SessionEvent::TimelineUpdated {
                            messages: st.reconciler.rendered().to_vec(),
                            scroll: ScrollHint::None,
                        })
                    } else {
                        // Already re-keyed by a merge that raced the reply.
                        None
                    }
                };
                if let Some(event) = event {
                    ctx.send_event(event).await;
                }
                Ok(())
            }
            Err(e) => {
                warn!("send to thread {} failed: {}", thread_id, e);
                let event = {
                    let mut st = ctx.state.lock().await;
                    st.reconciler.drop_optimistic(&local_id);
                    st.last_rendered_len = st.reconciler.rendered().len();
                    SessionEvent::TimelineUpdated {
                        messages: st.reconciler.rendered().to_vec(),
                        scroll: ScrollHint::None,
                    }
                };
                ctx.send_event(event).await;
                ctx.send_event(SessionEvent::Error(format!(
                    "message could not be sent: {}",
                    e
                )))
                .await;
                Err(e)
            }
        }
    }

    /// Whether the thread view is foregrounded and focused. Background
    /// state gates notification intents.
    pub fn set_foreground(&self, foreground: bool) {
        self.ctx.foreground.store(foreground, Ordering::SeqCst);
    }

    pub async fn timeline(&self) -> Vec<Message> {
        self.ctx.state.lock().await.reconciler.rendered().to_vec()
    }

    pub async fn active_thread(&self) -> Option<Thread> {
        self.ctx.state.lock().await.active_thread.clone()
    }

    pub async fn threads(&self) -> Vec<Thread> {
        self.ctx.state.lock().await.threads.clone()
    }

    /// Cancel the poll loop and invalidate any in-flight responses.
    pub fn shutdown(&mut self) {
        self.ctx.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        info!("session shut down");
    }

    async fn lookup_thread(&self, thread_id: &str) -> Result<Thread, SyncError> {
        {
            let st = self.ctx.state.lock().await;
            if let Some(thread) = st.threads.iter().find(|t| t.id == thread_id) {
                return Ok(thread.clone());
            }
        }
        warn!("unknown thread id {}, falling back to maintainer", thread_id);
        match self.directory.get_maintainer_thread().await {
            Ok(thread) => Ok(thread),
            Err(_) => {
                let st = self.ctx.state.lock().await;
                st.threads
                    .first()
                    .cloned()
                    .ok_or_else(|| SyncError::Transport("no threads available".to_string()))
            }
        }
    }
}

impl Drop for ThreadSession {
    fn drop(&mut self) {
        self.ctx.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

impl SessionCtx {
    async fn poll_loop(ctx: Arc<SessionCtx>, thread_id: String, my_gen: u64) {
        info!("poll loop started for thread {}", thread_id);
        loop {
            tokio::time::sleep(ctx.poll_delay()).await;
            if ctx.generation.load(Ordering::SeqCst) != my_gen {
                debug!("poll loop for {} superseded", thread_id);
                return;
            }
            match ctx.store.get_messages(&thread_id).await {
                Ok(snapshot) => {
                    // A slow response must not merge into a newer thread's
                    // timeline.
                    if ctx.generation.load(Ordering::SeqCst) != my_gen {
                        debug!("discarding stale snapshot for thread {}", thread_id);
                        return;
                    }
                    ctx.apply_snapshot(my_gen, snapshot).await;
                }
                Err(e) => {
                    warn!("poll failed for thread {}: {}", thread_id, e);
                    ctx.send_event(SessionEvent::Error(format!(
                        "could not refresh messages: {}",
                        e
                    )))
                    .await;
                    tokio::time::sleep(ctx.policy.error_backoff).await;
                }
            }
        }
    }

    /// Merge one snapshot and derive all downstream signals. Runs entirely
    /// under the state lock so a concurrent send's optimistic append is
    /// either fully before or fully after this merge.
    async fn apply_snapshot(self: &Arc<Self>, my_gen: u64, snapshot: Vec<Message>) {
        let mut events: Vec<SessionEvent> = Vec::new();
        let mut typing_expiry = None;
        {
            let mut st = self.state.lock().await;
            if self.generation.load(Ordering::SeqCst) != my_gen {
                debug!("snapshot arrived for a superseded generation, discarded");
                return;
            }
            let now = Utc::now();
            let report = st.reconciler.merge(snapshot, now);
            let sim_changed = st.reconciler.tick_simulation(now);
            let first = !st.first_load_done;
            let rendered_len = st.reconciler.rendered().len();

            if report.changed || sim_changed || first {
                let scroll = if !first && rendered_len > st.last_rendered_len {
                    ScrollHint::ToLatest
                } else {
                    ScrollHint::None
                };
                events.push(SessionEvent::TimelineUpdated {
                    messages: st.reconciler.rendered().to_vec(),
                    scroll,
                });
            }
            st.first_load_done = true;
            st.last_rendered_len = rendered_len;

            let estimate = self.typing.estimate(
                st.reconciler.rendered().last(),
                &self.local_sender_id,
                now,
            );
            if estimate.active != st.typing_active {
                st.typing_active = estimate.active;
                events.push(SessionEvent::Typing(estimate.active));
            }
            if estimate.active {
                typing_expiry = estimate.expires_in;
            }

            // History present at the first load is not "new"; it never
            // notifies.
            if !first && !report.new_remote.is_empty() {
                let foreground = self.foreground.load(Ordering::SeqCst);
                let delivered =
                    self.bridge
                        .observe(&report.new_remote, &self.local_sender_id, foreground);
                if delivered > 0 {
                    debug!("emitted {} notification intents", delivered);
                }
            }
        }
        for event in events {
            self.send_event(event).await;
        }
        if let Some(delay) = typing_expiry {
            self.spawn_typing_expiry(my_gen, delay);
        }
    }

    /// The typing flag self-expires at the end of the recency window unless
    /// a newer remote message re-arms it first.
    fn spawn_typing_expiry(self: &Arc<Self>, my_gen: u64, delay: std::time::Duration) {
        let ctx = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay + Duration::from_millis(20)).await;
            if ctx.generation.load(Ordering::SeqCst) != my_gen {
                return;
            }
            let expired = {
                let mut st = ctx.state.lock().await;
                if ctx.generation.load(Ordering::SeqCst) != my_gen {
                    return;
                }
                let estimate = ctx.typing.estimate(
                    st.reconciler.rendered().last(),
                    &ctx.local_sender_id,
                    Utc::now(),
                );
                if !estimate.active && st.typing_active {
                    st.typing_active = false;
                    true
                } else {
                    false
                }
            };
            if expired {
                ctx.send_event(SessionEvent::Typing(false)).await;
            }
        });
    }

    fn poll_delay(&self) -> Duration {
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.policy.interval;
        }
        self.policy.interval + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }

    async fn send_event(&self, event: SessionEvent) {
        if let Err(e) = self.events.send(event).await {
            debug!("event receiver dropped: {}", e);
        }
    }
}
