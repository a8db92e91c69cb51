//! Merge point for the microphone and assistant feeds.
//!
//! The sink is a timeline at the output sample rate anchored at the output
//! clock time the call went live. Both feeds are summed into it and finished
//! regions are handed to the recorder as PCM chunks.

use crate::audio::decoder::PlaybackBuffer;
use crate::audio::wav::resample;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::types::AudioFrame;
use crate::recording::recorder::{Recorder, RecordingArtifact};

#[derive(Debug)]
pub struct RecordingMixer {
    sample_rate: u32,
    input_rate: u32,
    flush_lag: f64,
    origin: f64,
    /// Absolute sample index of `timeline[0]`.
    flushed: usize,
    timeline: Vec<f32>,
    mic_cursor: Option<usize>,
    recorder: Recorder,
}

impl RecordingMixer {
    pub fn new(sample_rate: u32, input_rate: u32) -> Self {
        Self {
            sample_rate,
            input_rate,
            flush_lag: defaults::RECORDER_FLUSH_LAG_SECS,
            origin: 0.0,
            flushed: 0,
            timeline: Vec::new(),
            mic_cursor: None,
            recorder: Recorder::new(sample_rate),
        }
    }

    pub fn with_flush_lag(mut self, secs: f64) -> Self {
        self.flush_lag = secs.max(0.0);
        self
    }

    /// Anchor the sink at output clock `now` and start the recorder.
    pub fn start(&mut self, now: f64) {
        if self.recorder.is_recording() {
            return;
        }
        self.origin = now;
        self.flushed = 0;
        self.timeline.clear();
        self.mic_cursor = None;
        self.recorder.start();
        tracing::debug!(origin = now, rate = self.sample_rate, "Recording started");
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Feed one microphone frame that finished capturing at output clock `now`.
    ///
    /// The first frame is placed so that it ends at `now`; later frames follow
    /// contiguously so clock jitter never opens gaps in the caller's voice.
    pub fn feed_microphone(&mut self, frame: &AudioFrame, now: f64) {
        if !self.is_recording() {
            return;
        }
        let samples = resample(&frame.samples, self.input_rate, self.sample_rate);
        let start = match self.mic_cursor {
            Some(cursor) => cursor,
            None => self.index_of(now - frame.duration(self.input_rate)),
        };
        self.mic_cursor = Some(start + samples.len());
        self.mix_at(start, &samples);
    }

    /// Feed a playback buffer scheduled to start at output clock `at`.
    pub fn feed_playback(&mut self, buffer: &PlaybackBuffer, at: f64) {
        if !self.is_recording() {
            return;
        }
        let samples = resample(&buffer.to_mono(), buffer.sample_rate(), self.sample_rate);
        let start = self.index_of(at);
        self.mix_at(start, &samples);
    }

    /// Hand every region older than the flush lag to the recorder.
    pub fn flush(&mut self, now: f64) {
        if !self.is_recording() {
            return;
        }
        let limit = self.index_of(now - self.flush_lag);
        self.drain_to(limit);
    }

    /// Flush everything up to `now`, drop anything scheduled later, and stop
    /// the recorder.
    ///
    /// # Errors
    /// Returns `PraniError::Recording` if the artifact cannot be assembled.
    pub fn finish(&mut self, now: f64) -> Result<Option<RecordingArtifact>> {
        if self.is_recording() {
            let limit = self.index_of(now);
            self.drain_to(limit);
            self.timeline.clear();
        }
        self.recorder.stop()
    }

    /// Seconds of audio already handed to the recorder.
    pub fn recorded_secs(&self) -> f64 {
        self.flushed as f64 / f64::from(self.sample_rate.max(1))
    }

    fn index_of(&self, time: f64) -> usize {
        ((time - self.origin).max(0.0) * f64::from(self.sample_rate)).round() as usize
    }

    fn mix_at(&mut self, start: usize, samples: &[f32]) {
        let end = start + samples.len();
        if end <= self.flushed {
            tracing::trace!(start, end, "Dropping audio for an already recorded region");
            return;
        }
        // Skip the part that falls before the flushed boundary.
        let skip = self.flushed.saturating_sub(start);
        let offset = start + skip - self.flushed;
        let needed = offset + samples.len() - skip;
        if self.timeline.len() < needed {
            self.timeline.resize(needed, 0.0);
        }
        for (slot, &sample) in self.timeline[offset..needed].iter_mut().zip(&samples[skip..]) {
            *slot += sample;
        }
    }

    fn drain_to(&mut self, limit: usize) {
        if limit <= self.flushed {
            return;
        }
        let count = limit - self.flushed;
        if self.timeline.len() < count {
            self.timeline.resize(count, 0.0);
        }
        let rest = self.timeline.split_off(count);
        let region = std::mem::replace(&mut self.timeline, rest);
        self.flushed = limit;
        self.recorder.push_chunk(floats_to_pcm16_saturating(&region));
    }
}

/// Recording-side PCM conversion: overlapping speakers can sum past full
/// scale, so this saturates.
fn floats_to_pcm16_saturating(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let value = if s.is_finite() {
                (s * 32768.0).clamp(-32768.0, 32767.0) as i16
            } else {
                0
            };
            value.to_le_bytes()
        })
        .collect()
}
