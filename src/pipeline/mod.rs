//! Streaming audio pipeline.
//!
//! Capture runs on its own thread and feeds a bounded tokio queue for
//! backpressure; playback is scheduled on the output clock.

pub mod capture;
pub mod scheduler;
pub mod types;

pub use capture::{CaptureHandle, Framer};
pub use scheduler::{PlaybackScheduler, ScheduledBuffer};
pub use types::{AudioFrame, PcmChunk};
