use crate::defaults;
use crate::error::{PraniError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Trait for microphone-like input sources (one input audio context).
///
/// This trait allows swapping implementations (real device, WAV file, mock).
pub trait AudioSource: Send {
    /// Ask the platform for microphone access.
    ///
    /// # Errors
    /// Returns `PraniError::PermissionDenied` if access is refused. Any other
    /// error means the device could not be reached at all.
    fn request_permission(&mut self) -> Result<()> {
        Ok(())
    }

    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio. Must be safe to call when already stopped.
    fn stop(&mut self) -> Result<()>;

    /// Read the float samples captured since the previous call.
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Sample rate of the returned samples.
    fn sample_rate(&self) -> u32 {
        defaults::INPUT_SAMPLE_RATE
    }

    /// Finite sources (files) end when `read_samples` returns nothing.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Observable state of a [`MockAudioSource`], shared with the test.
#[derive(Debug, Default)]
pub struct MockSourceMonitor {
    started: AtomicBool,
    permission_requests: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
}

impl MockSourceMonitor {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn permission_requests(&self) -> u32 {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    samples: Vec<f32>,
    max_reads: Option<u32>,
    reads: u32,
    finite: bool,
    deny_permission: bool,
    should_fail_start: bool,
    deny_on_start: bool,
    start_delay: Option<Duration>,
    should_fail_read: bool,
    error_message: String,
    monitor: Arc<MockSourceMonitor>,
}

impl MockAudioSource {
    /// Create a mock that returns 1024 silent samples on every read.
    pub fn new() -> Self {
        Self {
            samples: vec![0.0; 1024],
            max_reads: None,
            reads: 0,
            finite: false,
            deny_permission: false,
            should_fail_start: false,
            deny_on_start: false,
            start_delay: None,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
            monitor: Arc::new(MockSourceMonitor::default()),
        }
    }

    /// Configure the samples returned by each read
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.samples = samples;
        self
    }

    /// Return samples for `count` reads, then nothing
    pub fn with_max_reads(mut self, count: u32) -> Self {
        self.max_reads = Some(count);
        self
    }

    /// Behave like a file: the capture loop ends once reads run out
    pub fn finite(mut self) -> Self {
        self.finite = true;
        self
    }

    /// Refuse microphone permission
    pub fn with_permission_denied(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Grant the permission request but refuse access when capture starts
    pub fn with_start_denied(mut self) -> Self {
        self.deny_on_start = true;
        self
    }

    /// Block inside `start`, like a device that is slow to open
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Shared handle for inspecting the mock after it was moved away
    pub fn monitor(&self) -> Arc<MockSourceMonitor> {
        Arc::clone(&self.monitor)
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn request_permission(&mut self) -> Result<()> {
        self.monitor.permission_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_permission {
            Err(PraniError::PermissionDenied {
                message: "NotAllowedError".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn start(&mut self) -> Result<()> {
        self.monitor.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            std::thread::sleep(delay);
        }
        if self.deny_on_start {
            return Err(PraniError::PermissionDenied {
                message: "input device not available".to_string(),
            });
        }
        if self.should_fail_start {
            return Err(PraniError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.monitor.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.monitor.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.monitor.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            return Err(PraniError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        if self.max_reads.is_some_and(|max| self.reads >= max) {
            return Ok(Vec::new());
        }
        self.reads += 1;
        Ok(self.samples.clone())
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}
