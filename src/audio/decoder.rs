//! Reconstructs playable buffers from raw response PCM.

use crate::audio::pcm::pcm16_to_floats;
use crate::error::{PraniError, Result};

/// Decoded float audio ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// One sample vector per channel, all the same length.
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    /// Creates a buffer from per-channel samples.
    ///
    /// # Errors
    /// Returns `PraniError::MalformedAudio` if channel lengths differ.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        let frames = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(PraniError::MalformedAudio {
                len: channels.iter().map(Vec::len).sum::<usize>() * 2,
                stride: channels.len() * 2,
            });
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Mono buffer helper.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            channels: vec![samples],
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Averages all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Decodes raw 16-bit PCM into a playback buffer.
///
/// Pure and deterministic. Empty input gives an empty buffer.
///
/// # Errors
/// Returns `PraniError::MalformedAudio` if `channels` is zero or the byte
/// length is not a whole multiple of `channels * 2`.
pub fn decode(raw: &[u8], sample_rate: u32, channels: u16) -> Result<PlaybackBuffer> {
    let stride = usize::from(channels) * 2;
    if stride == 0 || raw.len() % stride != 0 {
        return Err(PraniError::MalformedAudio {
            len: raw.len(),
            stride,
        });
    }

    Ok(PlaybackBuffer {
        channels: pcm16_to_floats(raw, usize::from(channels)),
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_mono_duration() {
        let raw = pcm(&vec![0i16; 24000]);
        let buffer = decode(&raw, 24000, 1).unwrap();
        assert_eq!(buffer.frames(), 24000);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_stereo_splits_channels() {
        let raw = pcm(&[16384, -16384, 8192, -8192]);
        let buffer = decode(&raw, 24000, 2).unwrap();

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.channel(0).unwrap(), &[0.5, 0.25]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.5, -0.25]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        match decode(&[0, 0, 0], 24000, 1) {
            Err(PraniError::MalformedAudio { len, stride }) => {
                assert_eq!(len, 3);
                assert_eq!(stride, 2);
            }
            other => panic!("Expected MalformedAudio, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_partial_stereo_frame() {
        let raw = pcm(&[1, 2, 3]);
        assert!(matches!(
            decode(&raw, 24000, 2),
            Err(PraniError::MalformedAudio { len: 6, stride: 4 })
        ));
    }

    #[test]
    fn test_decode_rejects_zero_channels() {
        assert!(matches!(
            decode(&[], 24000, 0),
            Err(PraniError::MalformedAudio { .. })
        ));
    }

    #[test]
    fn test_decode_empty_gives_empty_buffer() {
        let buffer = decode(&[], 24000, 1).unwrap();
        assert_eq!(buffer.frames(), 0);
        assert_eq!(buffer.duration(), 0.0);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let raw = pcm(&[5, -7, 1000, -32768]);
        assert_eq!(decode(&raw, 24000, 1).unwrap(), decode(&raw, 24000, 1).unwrap());
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let buffer = PlaybackBuffer::new(vec![vec![0.5, 0.0], vec![-0.5, 1.0]], 24000).unwrap();
        assert_eq!(buffer.to_mono(), vec![0.0, 0.5]);
    }

    #[test]
    fn test_new_rejects_ragged_channels() {
        assert!(PlaybackBuffer::new(vec![vec![0.0; 3], vec![0.0; 2]], 24000).is_err());
    }
}
