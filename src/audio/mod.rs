pub mod decoder;
pub mod output;
pub mod pcm;
pub mod source;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod speaker;

use crate::error::Result;
use output::{AudioOutput, MockAudioOutput};
use source::{AudioSource, MockAudioSource};
use std::sync::{Arc, Mutex};

/// Opens the two audio contexts a call needs.
///
/// Each connect attempt opens a fresh pair and teardown releases both.
pub trait AudioDevices: Send + Sync {
    fn open_input(&self) -> Result<Box<dyn AudioSource>>;
    fn open_output(&self) -> Result<Box<dyn AudioOutput>>;
}

/// Real devices: a CPAL microphone (or a WAV file) and the default speaker.
#[cfg(feature = "cpal-audio")]
pub struct SystemAudioDevices {
    pub input_device: Option<String>,
    pub input_wav: Option<std::path::PathBuf>,
}

#[cfg(feature = "cpal-audio")]
impl AudioDevices for SystemAudioDevices {
    fn open_input(&self) -> Result<Box<dyn AudioSource>> {
        if let Some(path) = &self.input_wav {
            return Ok(Box::new(wav::WavAudioSource::open(path)?));
        }
        Ok(Box::new(capture::CpalAudioSource::new(
            self.input_device.as_deref(),
        )?))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(speaker::CpalAudioOutput::new()?))
    }
}

/// Mock device factory handing out clones of template mocks.
///
/// Every opened output shares state with [`MockAudioDevices::output`], so a
/// test can drive the clock after the controller took ownership.
pub struct MockAudioDevices {
    input: MockAudioSource,
    output: MockAudioOutput,
    opened_inputs: Mutex<u32>,
    opened_outputs: Mutex<u32>,
    live: Arc<Mutex<LiveInputs>>,
}

/// Inputs opened and not yet stopped or dropped.
#[derive(Debug, Default)]
struct LiveInputs {
    current: u32,
    max: u32,
}

impl MockAudioDevices {
    pub fn new(input: MockAudioSource, output: MockAudioOutput) -> Self {
        Self {
            input,
            output,
            opened_inputs: Mutex::new(0),
            opened_outputs: Mutex::new(0),
            live: Arc::new(Mutex::new(LiveInputs::default())),
        }
    }

    pub fn output(&self) -> &MockAudioOutput {
        &self.output
    }

    pub fn input(&self) -> &MockAudioSource {
        &self.input
    }

    pub fn opened_inputs(&self) -> u32 {
        self.opened_inputs.lock().map_or(0, |n| *n)
    }

    pub fn opened_outputs(&self) -> u32 {
        self.opened_outputs.lock().map_or(0, |n| *n)
    }

    pub fn live_inputs(&self) -> u32 {
        self.live.lock().map_or(0, |l| l.current)
    }

    /// Highest number of inputs held at once.
    pub fn max_live_inputs(&self) -> u32 {
        self.live.lock().map_or(0, |l| l.max)
    }
}

/// An opened mock input that counts as live until its first stop.
struct TrackedInput {
    inner: MockAudioSource,
    live: Arc<Mutex<LiveInputs>>,
    released: bool,
}

impl TrackedInput {
    fn open(inner: MockAudioSource, live: Arc<Mutex<LiveInputs>>) -> Self {
        if let Ok(mut l) = live.lock() {
            l.current += 1;
            l.max = l.max.max(l.current);
        }
        Self {
            inner,
            live,
            released: false,
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Ok(mut l) = self.live.lock() {
            l.current = l.current.saturating_sub(1);
        }
    }
}

impl AudioSource for TrackedInput {
    fn request_permission(&mut self) -> Result<()> {
        self.inner.request_permission()
    }

    fn start(&mut self) -> Result<()> {
        self.inner.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.release();
        self.inner.stop()
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        self.inner.read_samples()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn is_finite(&self) -> bool {
        self.inner.is_finite()
    }
}

impl Drop for TrackedInput {
    fn drop(&mut self) {
        self.release();
    }
}

impl Default for MockAudioDevices {
    fn default() -> Self {
        Self::new(MockAudioSource::new(), MockAudioOutput::new())
    }
}

impl AudioDevices for MockAudioDevices {
    fn open_input(&self) -> Result<Box<dyn AudioSource>> {
        if let Ok(mut n) = self.opened_inputs.lock() {
            *n += 1;
        }
        Ok(Box::new(TrackedInput::open(
            self.input.clone(),
            Arc::clone(&self.live),
        )))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>> {
        if let Ok(mut n) = self.opened_outputs.lock() {
            *n += 1;
        }
        Ok(Box::new(self.output.clone()))
    }
}
