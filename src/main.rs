use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use tokio::time::Duration;

use confab::session::{PollPolicy, SessionConfig, SessionEvent, ThreadSession};
use confab::utils;

mod demo;

use demo::{DemoBackend, PrintSink, LOCAL_USER};

/// Runs the synchronization engine against a scripted in-memory backend:
/// the remote side releases messages on a schedule, the session polls and
/// reconciles, and every event the UI would consume is printed.
#[derive(Parser, Debug)]
#[command(author, version, about = "Conversation sync engine demo")]
struct Args {
    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    /// How long to run the demo, in seconds
    #[arg(long, default_value_t = 14)]
    run_secs: u64,

    /// Log to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Pretend the view is backgrounded so remote messages raise
    /// notification intents
    #[arg(long)]
    background: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(args.log_file.as_deref(), LevelFilter::Debug)?;

    let backend = Arc::new(DemoBackend::new()?);
    let mut config = SessionConfig::new(LOCAL_USER, "You");
    config.poll = PollPolicy {
        interval: Duration::from_millis(args.poll_interval_ms),
        ..PollPolicy::default()
    };

    let (mut session, mut events) = ThreadSession::new(
        backend.clone(),
        backend.clone(),
        Arc::new(PrintSink),
        config,
    );
    session.set_foreground(!args.background);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::ThreadSelected(thread) => {
                    println!("= thread: {} ({})", thread.id, thread.participant_name);
                }
                SessionEvent::TimelineUpdated { messages, scroll } => {
                    println!("- timeline ({} messages, scroll {:?}):", messages.len(), scroll);
                    for msg in &messages {
                        println!(
                            "    [{:?}] {}: {}",
                            msg.status, msg.sender_name, msg.content
                        );
                    }
                }
                SessionEvent::Typing(active) => {
                    println!("- typing: {}", active);
                }
                SessionEvent::Error(text) => {
                    println!("! {}", text);
                }
            }
        }
    });

    let thread = session.activate(None).await?;
    println!("connected to {}", thread.participant_name);

    // Exercise the send path, including the empty-send rejection.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    if let Err(e) = session.send_message("", Vec::new(), None).await {
        println!("! rejected as expected: {}", e);
    }
    session
        .send_message("Hello, just trying the chat.", Vec::new(), None)
        .await?;

    tokio::time::sleep(Duration::from_secs(args.run_secs)).await;
    session.shutdown();
    drop(session);
    printer.abort();
    Ok(())
}
