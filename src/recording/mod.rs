//! Dual-stream call recording.
//!
//! The mixer sums the caller's microphone and the assistant playback into
//! one sink; the recorder collects the sink into a single artifact.

pub mod mixer;
pub mod recorder;

pub use mixer::RecordingMixer;
pub use recorder::{Recorder, RecorderState, RecordingArtifact};
