//! Data types flowing between capture, transport and playback.

use crate::audio::pcm::floats_to_pcm16;
use crate::defaults;

/// A fixed-size block of microphone samples from one capture tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Float samples at the input rate, nominally in [-1, 1].
    pub samples: Vec<f32>,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sequence: u64) -> Self {
        Self { samples, sequence }
    }

    /// Duration of the frame at `sample_rate`, in seconds.
    pub fn duration(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(sample_rate)
    }
}

/// Encoded microphone audio ready for the live session.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    /// 16-bit signed little-endian PCM.
    pub data: Vec<u8>,
    pub mime: String,
    pub sequence: u64,
}

impl PcmChunk {
    /// Encode one capture frame with the uplink MIME descriptor.
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            data: floats_to_pcm16(&frame.samples),
            mime: defaults::UPLINK_MIME.to_string(),
            sequence: frame.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_chunk_from_frame() {
        let frame = AudioFrame::new(vec![0.5, -0.5], 7);
        let chunk = PcmChunk::from_frame(&frame);

        assert_eq!(chunk.data, vec![0x00, 0x40, 0x00, 0xC0]);
        assert_eq!(chunk.mime, "audio/pcm;rate=16000");
        assert_eq!(chunk.sequence, 7);
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 4096], 0);
        assert!((frame.duration(16000) - 0.256).abs() < 1e-9);
        assert_eq!(frame.duration(0), 0.0);
    }
}
