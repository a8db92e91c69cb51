//! Microphone polling thread feeding the ordered frame queue.

use crate::audio::source::AudioSource;
use crate::error::{PraniError, Result};
use crate::pipeline::types::AudioFrame;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const POLL_INTERVAL: Duration = Duration::from_millis(16);
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Splits an arbitrary sample stream into fixed-size frames.
#[derive(Debug)]
pub struct Framer {
    frame_samples: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl Framer {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            next_sequence: 0,
        }
    }

    /// Append samples and return every complete frame, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let block = std::mem::replace(&mut self.pending, rest);
            frames.push(self.frame(block));
        }
        frames
    }

    /// Emit the partial remainder, if any.
    pub fn finish(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let block = std::mem::take(&mut self.pending);
        Some(self.frame(block))
    }

    fn frame(&mut self, samples: Vec<f32>) -> AudioFrame {
        let frame = AudioFrame::new(samples, self.next_sequence);
        self.next_sequence += 1;
        frame
    }
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    started: Option<oneshot::Receiver<Result<()>>>,
}

impl CaptureHandle {
    /// Spawn the polling thread, which starts `source` before its first read.
    ///
    /// Device start-up can block for a while, so it never runs on the
    /// caller's thread. The outcome is reported through [`started`](Self::started).
    ///
    /// Frames are pushed with a blocking send, so a full queue stalls capture
    /// instead of dropping audio. The thread exits when the running flag is
    /// cleared, the receiver is dropped, or a finite source runs dry.
    pub fn spawn(
        mut source: Box<dyn AudioSource>,
        frame_samples: usize,
        frames_tx: mpsc::Sender<AudioFrame>,
    ) -> Self {
        let (started_tx, started_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let is_finite = source.is_finite();

        let thread = thread::spawn(move || {
            if let Err(e) = source.start() {
                if let Err(stop) = source.stop() {
                    tracing::debug!(error = %stop, "Failed to release microphone after start failure");
                }
                let _ = started_tx.send(Err(e));
                return;
            }
            let _ = started_tx.send(Ok(()));

            let mut framer = Framer::new(frame_samples);
            let mut consecutive_errors: u32 = 0;

            'poll: while thread_running.load(Ordering::SeqCst) {
                let samples = match source.read_samples() {
                    Ok(s) => {
                        consecutive_errors = 0;
                        s
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            tracing::error!(
                                error = %e,
                                attempts = consecutive_errors,
                                "Microphone capture failed repeatedly, stopping capture"
                            );
                            break;
                        }
                        thread::sleep(POLL_INTERVAL);
                        continue;
                    }
                };

                if samples.is_empty() {
                    if is_finite {
                        if let Some(frame) = framer.finish() {
                            let _ = frames_tx.blocking_send(frame);
                        }
                        tracing::debug!("Finite audio source exhausted");
                        break;
                    }
                    thread::sleep(POLL_INTERVAL);
                    continue;
                }

                for frame in framer.push(&samples) {
                    if !thread_running.load(Ordering::SeqCst)
                        || frames_tx.blocking_send(frame).is_err()
                    {
                        break 'poll;
                    }
                }

                thread::sleep(POLL_INTERVAL);
            }

            if let Err(e) = source.stop() {
                tracing::warn!(error = %e, "Failed to stop microphone");
            }
        });

        Self {
            running,
            thread: Some(thread),
            started: Some(started_rx),
        }
    }

    /// Wait until the source is running.
    ///
    /// # Errors
    /// Returns the source's start error. The thread has exited by then.
    pub async fn started(&mut self) -> Result<()> {
        match self.started.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(thread_gone())),
            None => Ok(()),
        }
    }

    /// Blocking form of [`started`](Self::started) for callers outside the runtime.
    ///
    /// # Errors
    /// Returns the source's start error.
    pub fn wait_started(&mut self) -> Result<()> {
        match self.started.take() {
            Some(rx) => rx.blocking_recv().unwrap_or_else(|_| Err(thread_gone())),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread to stop and wait for it. Safe to call twice.
    ///
    /// The frame receiver must already be closed or drained, otherwise a
    /// blocked send keeps the thread alive.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("Capture thread panicked");
        }
    }
}

fn thread_gone() -> PraniError {
    PraniError::AudioCapture {
        message: "capture thread exited before the microphone started".to_string(),
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
