//! Speaker output using CPAL.
//!
//! The output clock is the count of frames the device callback has rendered.
//! Scheduled buffers are mixed into the callback at their start frame.

use crate::audio::capture::{SendableStream, to_mono_at_rate, with_suppressed_stderr};
use crate::audio::decoder::PlaybackBuffer;
use crate::audio::output::{AudioOutput, BufferId};
use crate::defaults;
use crate::error::{PraniError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex};

struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct Playout {
    frames_played: u64,
    voices: Vec<Voice>,
}

impl Playout {
    /// Render `frames` frames into an interleaved buffer, reporting voices
    /// that finished.
    fn render(&mut self, out: &mut [f32], channels: usize, ended: &Sender<BufferId>) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let position = self.frames_played;
            let mut value = 0.0;
            for voice in &self.voices {
                if position >= voice.start_frame && position < voice.end_frame() {
                    value += voice.samples[(position - voice.start_frame) as usize];
                }
            }
            frame.fill(value);
            self.frames_played += 1;
        }

        let played = self.frames_played;
        self.voices.retain(|voice| {
            if voice.end_frame() <= played {
                let _ = ended.send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

/// Output audio context on the default speaker.
pub struct CpalAudioOutput {
    playout: Arc<Mutex<Playout>>,
    stream: Option<SendableStream>,
    ended_rx: Receiver<BufferId>,
    device_rate: u32,
    closed: bool,
}

impl CpalAudioOutput {
    /// Open the default output device and start its clock.
    ///
    /// # Errors
    /// Returns `PraniError::AudioDeviceNotFound` without an output device and
    /// `PraniError::AudioPlayback` if the stream cannot be started.
    pub fn new() -> Result<Self> {
        let device = with_suppressed_stderr(|| cpal::default_host().default_output_device())
            .ok_or_else(|| PraniError::AudioDeviceNotFound {
                device: "default output".to_string(),
            })?;

        let playout = Arc::new(Mutex::new(Playout::default()));
        let (ended_tx, ended_rx) = crossbeam_channel::unbounded();

        let (stream, device_rate) = Self::build_stream(&device, &playout, ended_tx)?;
        stream.play().map_err(|e| PraniError::AudioPlayback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        Ok(Self {
            playout,
            stream: Some(SendableStream(stream)),
            ended_rx,
            device_rate,
            closed: false,
        })
    }

    fn build_stream(
        device: &cpal::Device,
        playout: &Arc<Mutex<Playout>>,
        ended_tx: Sender<BufferId>,
    ) -> Result<(cpal::Stream, u32)> {
        let preferred = cpal::StreamConfig {
            channels: defaults::OUTPUT_CHANNELS,
            sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            buffer_size: cpal::BufferSize::Default,
        };

        let attempt = |config: cpal::StreamConfig, ended_tx: Sender<BufferId>| {
            let playout = Arc::clone(playout);
            let channels = usize::from(config.channels);
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match playout.lock() {
                    Ok(mut playout) => playout.render(data, channels, &ended_tx),
                    Err(_) => data.fill(0.0),
                },
                |err| tracing::warn!(error = %err, "Audio output stream error"),
                None,
            )
        };

        if let Ok(stream) = attempt(preferred, ended_tx.clone()) {
            return Ok((stream, defaults::OUTPUT_SAMPLE_RATE));
        }

        let native = device
            .default_output_config()
            .map_err(|e| PraniError::AudioPlayback {
                message: format!("Failed to query output config: {}", e),
            })?;
        if native.sample_format() != cpal::SampleFormat::F32 {
            return Err(PraniError::AudioPlayback {
                message: format!("Unsupported output sample format: {:?}", native.sample_format()),
            });
        }
        let rate = native.sample_rate();
        tracing::info!(
            channels = native.channels(),
            rate,
            "Using native output format, resampling in software"
        );

        let stream = attempt(native.into(), ended_tx).map_err(|e| PraniError::AudioPlayback {
            message: format!("Failed to build output stream: {}", e),
        })?;
        Ok((stream, rate))
    }
}

impl AudioOutput for CpalAudioOutput {
    fn now(&self) -> f64 {
        let frames = self.playout.lock().map_or(0, |p| p.frames_played);
        frames as f64 / f64::from(self.device_rate)
    }

    fn start_buffer(&mut self, id: BufferId, buffer: &PlaybackBuffer, at: f64) -> Result<()> {
        if self.closed {
            return Err(PraniError::AudioPlayback {
                message: "output context is closed".to_string(),
            });
        }

        let samples = to_mono_at_rate(&buffer.to_mono(), 1, buffer.sample_rate(), self.device_rate);
        let start_frame = (at.max(0.0) * f64::from(self.device_rate)).round() as u64;

        let mut playout = self.playout.lock().map_err(|e| PraniError::AudioPlayback {
            message: format!("Failed to lock playout: {}", e),
        })?;
        playout.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop_buffer(&mut self, id: BufferId) {
        if let Ok(mut playout) = self.playout.lock() {
            playout.voices.retain(|voice| voice.id != id);
        }
    }

    fn take_ended(&mut self) -> Vec<BufferId> {
        self.ended_rx.try_iter().collect()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        if let Ok(mut playout) = self.playout.lock() {
            playout.voices.clear();
        }
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| PraniError::AudioPlayback {
                message: format!("Failed to stop output stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
