//! Output audio context: a clock plus sample-accurate buffer starts.

use crate::audio::decoder::PlaybackBuffer;
use crate::defaults;
use crate::error::{PraniError, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identity of one scheduled playback buffer.
pub type BufferId = u64;

/// Trait for speaker outputs.
///
/// The output owns the playback clock. Buffers are started at absolute
/// clock times and report completion through `take_ended`.
pub trait AudioOutput: Send {
    /// Current output clock time in seconds.
    fn now(&self) -> f64;

    /// Sample rate of the output context.
    fn sample_rate(&self) -> u32 {
        defaults::OUTPUT_SAMPLE_RATE
    }

    /// Start `buffer` at clock time `at`.
    fn start_buffer(&mut self, id: BufferId, buffer: &PlaybackBuffer, at: f64) -> Result<()>;

    /// Stop a buffer whether or not it has finished. Unknown ids are ignored.
    fn stop_buffer(&mut self, id: BufferId);

    /// Ids of buffers that finished playing since the previous call.
    fn take_ended(&mut self) -> Vec<BufferId>;

    /// Close the context. Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// A buffer start recorded by [`MockAudioOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct StartedBuffer {
    pub id: BufferId,
    pub at: f64,
    pub duration: f64,
}

/// Observable state of a [`MockAudioOutput`].
#[derive(Debug, Default)]
pub struct MockOutputState {
    pub time: f64,
    pub started: Vec<StartedBuffer>,
    pub stopped: Vec<BufferId>,
    pub close_calls: u32,
    reported: Vec<BufferId>,
}

impl MockOutputState {
    /// Buffers started but neither stopped nor past their end time.
    pub fn playing(&self) -> Vec<BufferId> {
        self.started
            .iter()
            .filter(|b| !self.stopped.contains(&b.id) && b.at + b.duration > self.time)
            .map(|b| b.id)
            .collect()
    }
}

/// Mock output with a manually driven clock.
#[derive(Debug, Clone, Default)]
pub struct MockAudioOutput {
    state: Arc<Mutex<MockOutputState>>,
    fail_start: bool,
}

impl MockAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail every buffer start
    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Shared state for inspection after the mock was boxed.
    pub fn state(&self) -> Arc<Mutex<MockOutputState>> {
        Arc::clone(&self.state)
    }

    pub fn set_time(&self, time: f64) {
        self.lock().time = time;
    }

    pub fn advance(&self, secs: f64) {
        self.lock().time += secs;
    }

    fn lock(&self) -> MutexGuard<'_, MockOutputState> {
        // A poisoned mock only happens after a test already panicked.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AudioOutput for MockAudioOutput {
    fn now(&self) -> f64 {
        self.lock().time
    }

    fn start_buffer(&mut self, id: BufferId, buffer: &PlaybackBuffer, at: f64) -> Result<()> {
        if self.fail_start {
            return Err(PraniError::AudioPlayback {
                message: "mock output refused buffer".to_string(),
            });
        }
        self.lock().started.push(StartedBuffer {
            id,
            at,
            duration: buffer.duration(),
        });
        Ok(())
    }

    fn stop_buffer(&mut self, id: BufferId) {
        let mut state = self.lock();
        if state.started.iter().any(|b| b.id == id) {
            state.stopped.push(id);
        }
    }

    fn take_ended(&mut self) -> Vec<BufferId> {
        let mut state = self.lock();
        let time = state.time;
        let ended: Vec<BufferId> = state
            .started
            .iter()
            .filter(|b| b.at + b.duration <= time)
            .map(|b| b.id)
            .filter(|id| !state.stopped.contains(id) && !state.reported.contains(id))
            .collect();
        state.reported.extend(ended.iter().copied());
        ended
    }

    fn close(&mut self) -> Result<()> {
        self.lock().close_calls += 1;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lock().close_calls > 0
    }
}
