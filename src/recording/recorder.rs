//! Recorder observing the mixer sink, and the finished recording artifact.

use crate::audio::wav::pcm16_to_wav;
use crate::defaults;
use crate::error::{PraniError, Result};
use std::path::{Path, PathBuf};

/// Lifecycle of the recorder within one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
    Stopped,
}

/// Accumulates binary PCM chunks handed over from the sink.
#[derive(Debug)]
pub struct Recorder {
    state: RecorderState,
    chunks: Vec<Vec<u8>>,
    sample_rate: u32,
}

impl Recorder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: RecorderState::Inactive,
            chunks: Vec::new(),
            sample_rate,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    /// Begin observing. Restarting a stopped recorder is not supported.
    pub fn start(&mut self) {
        if self.state == RecorderState::Inactive {
            self.state = RecorderState::Recording;
        }
    }

    /// Accept one chunk of 16-bit PCM. Ignored unless recording.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) {
        if self.is_recording() && !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Stop and concatenate every chunk into one artifact.
    ///
    /// Returns `Ok(None)` if the recorder never started, and also on a second
    /// call since the chunks were already consumed.
    ///
    /// # Errors
    /// Returns `PraniError::Recording` if the container cannot be written.
    pub fn stop(&mut self) -> Result<Option<RecordingArtifact>> {
        if self.state != RecorderState::Recording {
            return Ok(None);
        }
        self.state = RecorderState::Stopped;

        let pcm = std::mem::take(&mut self.chunks).concat();
        let frames = pcm.len() / 2;
        let bytes = pcm16_to_wav(&pcm, self.sample_rate)?;

        tracing::debug!(frames, bytes = bytes.len(), "Recording finalized");

        Ok(Some(RecordingArtifact {
            bytes,
            mime: "audio/wav".to_string(),
            duration: frames as f64 / f64::from(self.sample_rate.max(1)),
        }))
    }
}

/// The merged call recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingArtifact {
    pub bytes: Vec<u8>,
    pub mime: String,
    /// Length in seconds.
    pub duration: f64,
}

impl RecordingArtifact {
    pub fn file_name(&self) -> &'static str {
        defaults::RECORDING_FILE_NAME
    }

    /// Write the artifact into `dir` under its download name.
    ///
    /// # Errors
    /// Returns `PraniError::Recording` if the directory or file cannot be written.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| PraniError::Recording {
            message: format!("Failed to create {}: {}", dir.display(), e),
        })?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, &self.bytes).map_err(|e| PraniError::Recording {
            message: format!("Failed to write {}: {}", path.display(), e),
        })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_without_start_returns_none() {
        let mut recorder = Recorder::new(24000);
        recorder.push_chunk(vec![1, 2]);
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(recorder.state(), RecorderState::Inactive);
    }

    #[test]
    fn test_stop_concatenates_chunks() {
        let mut recorder = Recorder::new(24000);
        recorder.start();
        recorder.push_chunk(vec![0u8; 24000]);
        recorder.push_chunk(vec![0u8; 24000]);
        assert_eq!(recorder.chunk_count(), 2);

        let artifact = recorder.stop().unwrap().unwrap();
        assert_eq!(artifact.mime, "audio/wav");
        assert!((artifact.duration - 1.0).abs() < 1e-9);

        let reader = hound::WavReader::new(std::io::Cursor::new(artifact.bytes)).unwrap();
        assert_eq!(reader.duration(), 24000);
    }

    #[test]
    fn test_second_stop_returns_none() {
        let mut recorder = Recorder::new(24000);
        recorder.start();
        assert!(recorder.stop().unwrap().is_some());
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(recorder.state(), RecorderState::Stopped);
    }

    #[test]
    fn test_chunks_after_stop_are_ignored() {
        let mut recorder = Recorder::new(24000);
        recorder.start();
        let _ = recorder.stop().unwrap();
        recorder.push_chunk(vec![0, 0]);
        assert_eq!(recorder.chunk_count(), 0);
    }

    #[test]
    fn test_artifact_save_uses_download_name() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = RecordingArtifact {
            bytes: vec![1, 2, 3],
            mime: "audio/wav".to_string(),
            duration: 0.0,
        };

        let path = artifact.save(&dir.path().join("calls")).unwrap();

        assert_eq!(path.file_name().unwrap(), "prani-mitra-recording.wav");
        assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
    }
}
