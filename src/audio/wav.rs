//! WAV helpers: file-backed audio source and the recording container.

use crate::audio::source::AudioSource;
use crate::defaults::INPUT_SAMPLE_RATE;
use crate::error::{PraniError, Result};
use std::io::{Cursor, Read};

/// Audio source that replays WAV file data as if it came from a microphone.
/// Supports arbitrary sample rates and channels, resampling to 16kHz mono.
pub struct WavAudioSource {
    samples: Vec<f32>,
    position: usize,
    chunk_size: usize,
}

impl WavAudioSource {
    /// Create from any reader.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| PraniError::AudioCapture {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let raw: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => wav_reader
                .samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / 32768.0))
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Float => wav_reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
        }
        .map_err(|e| PraniError::AudioCapture {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let mono: Vec<f32> = if channels == 1 {
            raw
        } else {
            raw.chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        let samples = resample(&mono, spec.sample_rate, INPUT_SAMPLE_RATE);

        Ok(Self {
            samples,
            position: 0,
            // 100ms reads at 16kHz
            chunk_size: 1600,
        })
    }

    /// Open a WAV file from disk.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_reader(Box::new(Cursor::new(bytes)))
    }

    /// Total duration of the file in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(INPUT_SAMPLE_RATE)
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }

        let end = std::cmp::min(self.position + self.chunk_size, self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Ok(chunk)
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (samples.len() as f64 / ratio).round() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

/// Wrap mono 16-bit little-endian PCM in a WAV container.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| PraniError::Recording {
                message: format!("Failed to create WAV writer: {}", e),
            })?;
        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| PraniError::Recording {
                    message: format!("Failed to write WAV sample: {}", e),
                })?;
        }
        writer.finalize().map_err(|e| PraniError::Recording {
            message: format!("Failed to finalize WAV: {}", e),
        })?;
    }

    Ok(cursor.into_inner())
}
