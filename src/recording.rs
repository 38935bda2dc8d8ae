// Voice capture state machine.
//
// idle --start--> recording --stop--> stopped (payload finalized)
//                 recording --cancel--> idle (payload discarded)
//                 stopped --take_payload/discard--> idle
//
// The capture device is exclusively owned for the session's duration and is
// released exactly once per successful start, on every exit path including
// teardown while recording.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::error::SyncError;
use crate::models::RecordingState;

/// Microphone (or other capture source) seam. `open` acquires the device;
/// permission and hardware failures surface as `SyncError::Device`.
pub trait CaptureDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureHandle>, SyncError>;
}

pub trait CaptureHandle: Send {
    /// Drain the captured audio. Called at most once, on stop.
    fn finalize(&mut self) -> Vec<u8>;
    /// Release the device. Called exactly once per successful open.
    fn release(&mut self);
}

enum Phase {
    Idle,
    Recording { handle: Box<dyn CaptureHandle> },
    Stopped { payload: Vec<u8> },
}

pub struct RecordingController {
    device: Arc<dyn CaptureDevice>,
    phase: Phase,
    elapsed: watch::Sender<u64>,
    ticker: Option<JoinHandle<()>>,
}

impl RecordingController {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        let (elapsed, _) = watch::channel(0);
        RecordingController {
            device,
            phase: Phase::Idle,
            elapsed,
            ticker: None,
        }
    }

    /// Begin capturing. A start while recording is a no-op; a start while a
    /// finalized payload is still held is also ignored until the payload is
    /// taken or discarded. Device acquisition failure leaves the state idle.
    pub fn start(&mut self) -> Result<(), SyncError> {
        match self.phase {
            Phase::Recording { .. } => {
                debug!("start ignored, already recording");
                return Ok(());
            }
            Phase::Stopped { .. } => {
                warn!("start ignored, previous recording awaiting discard or send");
                return Ok(());
            }
            Phase::Idle => {}
        }
        let handle = self.device.open()?;
        self.elapsed.send_replace(0);
        let tx = self.elapsed.clone();
        self.ticker = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                tx.send_modify(|secs| *secs += 1);
            }
        }));
        self.phase = Phase::Recording { handle };
        info!("recording started");
        Ok(())
    }

    /// Finalize the capture. The payload is held until `take_payload` or
    /// `discard`; elapsed time stays frozen at the recorded duration.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording { mut handle } => {
                self.stop_ticker();
                let payload = handle.finalize();
                handle.release();
                info!("recording stopped, {} bytes captured", payload.len());
                self.phase = Phase::Stopped { payload };
            }
            other => self.phase = other,
        }
    }

    /// Abort the capture, discarding everything and releasing the device.
    pub fn cancel(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording { mut handle } => {
                self.stop_ticker();
                handle.release();
                self.elapsed.send_replace(0);
                info!("recording canceled, payload discarded");
            }
            other => self.phase = other,
        }
    }

    /// Hand the finalized payload to the caller (who feeds it to the
    /// attachment pipeline) and return to idle.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Stopped { payload } => {
                self.elapsed.send_replace(0);
                Some(payload)
            }
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// Drop a finalized payload without sending it.
    pub fn discard(&mut self) {
        if self.take_payload().is_some() {
            debug!("finalized recording discarded");
        }
    }

    pub fn state(&self) -> RecordingState {
        match self.phase {
            Phase::Idle => RecordingState::Idle,
            Phase::Recording { .. } => RecordingState::Recording,
            Phase::Stopped { .. } => RecordingState::Stopped,
        }
    }

    /// Seconds recorded so far; increments once per second while recording,
    /// 0 when idle.
    pub fn elapsed_seconds(&self) -> u64 {
        *self.elapsed.borrow()
    }

    pub fn subscribe_elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed.subscribe()
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.stop_ticker();
        if let Phase::Recording { mut handle } = std::mem::replace(&mut self.phase, Phase::Idle) {
            warn!("controller torn down while recording, releasing device");
            handle.release();
        }
    }
}
