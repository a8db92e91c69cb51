//! Gapless sequential playback of decoded response audio.

use crate::audio::decoder::PlaybackBuffer;
use crate::audio::output::{AudioOutput, BufferId};
use crate::error::Result;
use crate::recording::RecordingMixer;
use std::collections::BTreeMap;

/// A buffer the scheduler started, with its absolute start time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: f64,
    pub duration: f64,
}

/// Schedules buffers back to back on the output clock.
///
/// `next_start_time` never decreases while a session lives. Each buffer
/// starts at `max(next_start_time, now)`, so audio that arrives early queues
/// up behind the previous buffer and audio that arrives late plays at once.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start_time: f64,
    next_id: BufferId,
    active: BTreeMap<BufferId, ScheduledBuffer>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: BufferId) -> bool {
        self.active.contains_key(&id)
    }

    /// Start `buffer` on `output` and feed it to the recording mixer.
    ///
    /// # Errors
    /// Returns the output's error if the buffer could not be started. The
    /// cursor is left unchanged in that case.
    pub fn play(
        &mut self,
        buffer: &PlaybackBuffer,
        output: &mut dyn AudioOutput,
        mixer: Option<&mut RecordingMixer>,
    ) -> Result<ScheduledBuffer> {
        let start = self.next_start_time.max(output.now());
        let duration = buffer.duration();
        let id = self.next_id;

        output.start_buffer(id, buffer, start)?;

        self.next_id += 1;
        self.next_start_time = start + duration;
        let scheduled = ScheduledBuffer {
            id,
            start,
            duration,
        };
        self.active.insert(id, scheduled);

        if let Some(mixer) = mixer {
            mixer.feed_playback(buffer, start);
        }

        tracing::trace!(id, start, duration, "Scheduled playback buffer");
        Ok(scheduled)
    }

    /// Forget a buffer that finished playing.
    pub fn on_ended(&mut self, id: BufferId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Collect finished buffers from the output.
    pub fn collect_ended(&mut self, output: &mut dyn AudioOutput) -> usize {
        output
            .take_ended()
            .into_iter()
            .filter(|&id| self.on_ended(id))
            .count()
    }

    /// Force-stop every active buffer and clear the set. Safe to call twice.
    pub fn teardown(&mut self, output: &mut dyn AudioOutput) {
        for id in std::mem::take(&mut self.active).into_keys() {
            output.stop_buffer(id);
        }
    }

    /// Rewind the cursor for a fresh output context.
    pub fn reset_cursor(&mut self) {
        self.next_start_time = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::MockAudioOutput;

    fn buffer(secs: f64) -> PlaybackBuffer {
        PlaybackBuffer::mono(vec![0.0; (secs * 24000.0).round() as usize], 24000)
    }

    #[test]
    fn test_buffers_play_back_to_back() {
        let mut scheduler = PlaybackScheduler::new();
        let mut output = MockAudioOutput::new();

        let starts: Vec<f64> = [0.5, 0.3, 0.4]
            .iter()
            .map(|&d| scheduler.play(&buffer(d), &mut output, None).unwrap().start)
            .collect();

        assert_eq!(starts.len(), 3);
        assert!((starts[0] - 0.0).abs() < 1e-9);
        assert!((starts[1] - 0.5).abs() < 1e-9);
        assert!((starts[2] - 0.8).abs() < 1e-9);
        assert!((scheduler.next_start_time() - 1.2).abs() < 1e-9);
        assert_eq!(scheduler.active_count(), 3);
    }

    #[test]
    fn test_late_buffer_starts_at_clock_now() {
        let mut scheduler = PlaybackScheduler::new();
        let mut output = MockAudioOutput::new();

        scheduler.play(&buffer(0.5), &mut output, None).unwrap();
        output.set_time(2.0);
        let late = scheduler.play(&buffer(0.25), &mut output, None).unwrap();

        assert_eq!(late.start, 2.0);
        assert!((scheduler.next_start_time() - 2.25).abs() < 1e-9);
    }

    #[test]
    fn test_cursor_never_decreases() {
        let mut scheduler = PlaybackScheduler::new();
        let mut output = MockAudioOutput::new();
        let mut last = 0.0;

        for (i, d) in [0.1, 0.0, 0.3, 0.2].iter().enumerate() {
            if i == 2 {
                output.set_time(0.05);
            }
            scheduler.play(&buffer(*d), &mut output, None).unwrap();
            assert!(scheduler.next_start_time() >= last);
            last = scheduler.next_start_time();
        }
    }

    #[test]
    fn test_ended_buffers_leave_active_set() {
        let mut scheduler = PlaybackScheduler::new();
        let mut output = MockAudioOutput::new();
        let first = scheduler.play(&buffer(0.5), &mut output, None).unwrap();
        scheduler.play(&buffer(0.5), &mut output, None).unwrap();

        output.set_time(0.6);
        assert_eq!(scheduler.collect_ended(&mut output), 1);
        assert!(!scheduler.is_active(first.id));
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn test_teardown_twice_leaves_no_handles() {
        let mut scheduler = PlaybackScheduler::new();
        let mut output = MockAudioOutput::new();
        let state = output.state();
        scheduler.play(&buffer(0.5), &mut output, None).unwrap();
        scheduler.play(&buffer(0.5), &mut output, None).unwrap();

        scheduler.teardown(&mut output);
        scheduler.teardown(&mut output);

        assert_eq!(scheduler.active_count(), 0);
        let state = state.lock().unwrap();
        assert_eq!(state.stopped, vec![0, 1]);
        assert!(state.playing().is_empty());
    }

    #[test]
    fn test_failed_start_leaves_cursor() {
        let mut scheduler = PlaybackScheduler::new();
        let mut output = MockAudioOutput::new().with_start_failure();

        assert!(scheduler.play(&buffer(0.5), &mut output, None).is_err());
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_play_feeds_mixer_at_start_time() {
        let mut scheduler = PlaybackScheduler::new();
        let mut output = MockAudioOutput::new();
        let mut mixer = RecordingMixer::new(24000, 16000).with_flush_lag(0.0);
        mixer.start(0.0);

        let loud = PlaybackBuffer::mono(vec![0.5; 2400], 24000);
        scheduler.play(&buffer(0.1), &mut output, Some(&mut mixer)).unwrap();
        scheduler.play(&loud, &mut output, Some(&mut mixer)).unwrap();

        let artifact = mixer.finish(0.2).unwrap().unwrap();
        let mut reader = hound::WavReader::new(std::io::Cursor::new(artifact.bytes)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 4800);
        assert_eq!(samples[2399], 0);
        assert_eq!(samples[2400], 16384);
    }

    #[test]
    fn test_reset_cursor() {
        let mut scheduler = PlaybackScheduler::new();
        let mut output = MockAudioOutput::new();
        scheduler.play(&buffer(0.5), &mut output, None).unwrap();
        scheduler.reset_cursor();
        assert_eq!(scheduler.next_start_time(), 0.0);
    }
}
