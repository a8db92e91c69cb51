//! Resources of one connect attempt.

use crate::audio::output::AudioOutput;
use crate::audio::source::AudioSource;
use crate::error::Result;
use crate::pipeline::{AudioFrame, CaptureHandle, PlaybackScheduler};
use crate::recording::{RecordingArtifact, RecordingMixer};
use crate::transport::{EventStream, LiveSession};
use tokio::sync::mpsc;

/// The single live session record.
///
/// Exactly one input and one output context exist per session. Capture
/// consumes the input source when streaming starts; until then the source is
/// held here so teardown can release it.
pub struct CallSession {
    session: Option<Box<dyn LiveSession>>,
    pub(crate) events: Option<EventStream>,
    input: Option<Box<dyn AudioSource>>,
    capture: Option<CaptureHandle>,
    pub(crate) frames: Option<mpsc::Receiver<AudioFrame>>,
    output: Option<Box<dyn AudioOutput>>,
    scheduler: PlaybackScheduler,
    mixer: RecordingMixer,
    input_rate: u32,
    teardowns: u32,
}

impl CallSession {
    pub fn new(
        input: Box<dyn AudioSource>,
        output: Box<dyn AudioOutput>,
        session: Box<dyn LiveSession>,
        events: EventStream,
        mixer: RecordingMixer,
    ) -> Self {
        let input_rate = input.sample_rate();
        Self {
            session: Some(session),
            events: Some(events),
            input: Some(input),
            capture: None,
            frames: None,
            output: Some(output),
            scheduler: PlaybackScheduler::new(),
            mixer,
            input_rate,
            teardowns: 0,
        }
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Output clock, or 0 once the output is gone.
    pub fn now(&self) -> f64 {
        self.output.as_ref().map_or(0.0, |o| o.now())
    }

    /// Start the capture thread and anchor the recording at the output clock.
    ///
    /// The source starts on the capture thread; this only awaits the outcome.
    ///
    /// # Errors
    /// Returns the source's error if capture cannot start, including
    /// `PraniError::PermissionDenied` when the device refuses access.
    pub async fn start_streaming(&mut self, frame_samples: usize, queue_frames: usize) -> Result<()> {
        let Some(input) = self.input.take() else {
            return Ok(());
        };
        let (frames_tx, frames_rx) = mpsc::channel(queue_frames.max(1));
        let mut capture = CaptureHandle::spawn(input, frame_samples, frames_tx);
        if let Err(e) = capture.started().await {
            capture.stop();
            return Err(e);
        }
        self.capture = Some(capture);
        self.frames = Some(frames_rx);
        let now = self.now();
        self.mixer.start(now);
        tracing::info!(frame_samples, "Streaming microphone to live session");
        Ok(())
    }

    /// Encode and submit one microphone frame, and feed it to the recording.
    pub fn send_frame(&mut self, frame: AudioFrame) {
        let now = self.now();
        self.mixer.feed_microphone(&frame, now);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let chunk = crate::pipeline::PcmChunk::from_frame(&frame);
        if let Err(e) = session.send(chunk) {
            tracing::debug!(error = %e, sequence = frame.sequence, "Dropping microphone chunk");
        }
    }

    /// Decode one inbound audio chunk and schedule it.
    ///
    /// Malformed chunks are dropped and playback continues.
    pub fn play_chunk(&mut self, bytes: &[u8], sample_rate: u32, channels: u16) {
        let buffer = match crate::audio::decoder::decode(bytes, sample_rate, channels) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed audio chunk");
                return;
            }
        };
        let Some(output) = self.output.as_deref_mut() else {
            return;
        };
        if let Err(e) = self.scheduler.play(&buffer, output, Some(&mut self.mixer)) {
            tracing::warn!(error = %e, "Failed to schedule assistant audio");
        }
    }

    /// Release finished buffers and let the recorder take settled audio.
    pub fn housekeeping(&mut self) {
        if let Some(output) = self.output.as_deref_mut() {
            self.scheduler.collect_ended(output);
        }
        let now = self.now();
        self.mixer.flush(now);
    }

    /// Stop capture because its stream ended.
    pub fn on_capture_ended(&mut self) {
        self.frames = None;
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        tracing::info!("Microphone stream ended");
    }

    pub fn next_start_time(&self) -> f64 {
        self.scheduler.next_start_time()
    }

    pub fn active_buffers(&self) -> usize {
        self.scheduler.active_count()
    }

    /// Close the live session. Failures are logged and never block the end.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.as_mut()
            && let Err(e) = session.close().await
        {
            tracing::warn!(error = %e, "Live session did not close cleanly");
        }
    }

    /// Stop the recorder and return the merged artifact, if recording started.
    pub fn finish_recording(&mut self) -> Option<RecordingArtifact> {
        let now = self.now();
        match self.mixer.finish(now) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(error = %e, "Failed to assemble call recording");
                None
            }
        }
    }

    /// Release every resource. Safe to call any number of times.
    pub async fn teardown(&mut self) {
        self.teardowns += 1;

        // Close the frame queue first so a blocked capture send returns.
        self.frames = None;
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut input) = self.input.take()
            && let Err(e) = input.stop()
        {
            tracing::debug!(error = %e, "Failed to stop unused microphone");
        }

        if let Some(mut output) = self.output.take() {
            self.scheduler.teardown(output.as_mut());
            if let Err(e) = output.close() {
                tracing::warn!(error = %e, "Failed to close audio output");
            }
        }
        self.scheduler.reset_cursor();

        if let Some(mut session) = self.session.take()
            && !session.is_closed()
            && let Err(e) = session.close().await
        {
            tracing::debug!(error = %e, "Live session close during teardown failed");
        }
        self.events = None;

        tracing::debug!(teardowns = self.teardowns, "Call session torn down");
    }

    /// Resources still held: session, event stream, input, capture, frame
    /// queue, output, and active playback buffers.
    pub fn handle_count(&self) -> usize {
        [
            self.session.is_some(),
            self.events.is_some(),
            self.input.is_some(),
            self.capture.is_some(),
            self.frames.is_some(),
            self.output.is_some(),
        ]
        .iter()
        .filter(|held| **held)
        .count()
            + self.scheduler.active_count()
    }

    pub fn teardown_count(&self) -> u32 {
        self.teardowns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::MockAudioOutput;
    use crate::audio::source::MockAudioSource;
    use crate::transport::mock::MockTransport;
    use crate::transport::{SessionConfig, Transport};
    use tokio_util::sync::CancellationToken;

    async fn session(output: MockAudioOutput, source: MockAudioSource) -> (CallSession, MockTransport) {
        let transport = MockTransport::new().with_open_session();
        let (live, events) = transport
            .connect(&SessionConfig::new("k", "i"), CancellationToken::new())
            .await
            .unwrap();
        let call = CallSession::new(
            Box::new(source),
            Box::new(output),
            live,
            events,
            RecordingMixer::new(24000, 16000).with_flush_lag(0.0),
        );
        (call, transport)
    }

    fn pcm(samples: usize) -> Vec<u8> {
        vec![0u8; samples * 2]
    }

    #[tokio::test]
    async fn test_double_teardown_leaves_no_handles() {
        let output = MockAudioOutput::new();
        let state = output.state();
        let (mut call, transport) = session(output, MockAudioSource::new()).await;
        call.start_streaming(1024, 4).await.unwrap();
        call.play_chunk(&pcm(2400), 24000, 1);
        call.play_chunk(&pcm(2400), 24000, 1);
        assert!(call.handle_count() > 0);

        call.teardown().await;
        call.teardown().await;

        assert_eq!(call.handle_count(), 0);
        assert_eq!(call.teardown_count(), 2);
        assert_eq!(call.next_start_time(), 0.0);
        let state = state.lock().unwrap();
        assert_eq!(state.close_calls, 1);
        assert!(state.playing().is_empty());
        assert_eq!(transport.state().lock().unwrap().open_sessions, 0);
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_dropped_and_playback_continues() {
        let (mut call, _transport) = session(MockAudioOutput::new(), MockAudioSource::new()).await;

        call.play_chunk(&pcm(2400), 24000, 1);
        call.play_chunk(&[0u8; 3], 24000, 1);
        call.play_chunk(&pcm(2400), 24000, 1);

        assert_eq!(call.active_buffers(), 2);
        assert!((call.next_start_time() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_teardown_stops_unused_input() {
        let source = MockAudioSource::new();
        let monitor = source.monitor();
        let (mut call, _transport) = session(MockAudioOutput::new(), source).await;

        call.teardown().await;
        assert_eq!(monitor.stop_calls(), 1);
        assert_eq!(monitor.start_calls(), 0);
    }

    #[tokio::test]
    async fn test_refused_start_keeps_error_type_and_releases_input() {
        let source = MockAudioSource::new().with_start_denied();
        let monitor = source.monitor();
        let (mut call, _transport) = session(MockAudioOutput::new(), source).await;

        let result = call.start_streaming(1024, 4).await;
        assert!(matches!(result, Err(crate::error::PraniError::PermissionDenied { .. })));
        assert_eq!(monitor.stop_calls(), 1);
        assert!(call.finish_recording().is_none());

        call.teardown().await;
        assert_eq!(call.handle_count(), 0);
    }

    #[tokio::test]
    async fn test_finish_without_streaming_has_no_recording() {
        let (mut call, _transport) = session(MockAudioOutput::new(), MockAudioSource::new()).await;
        call.play_chunk(&pcm(2400), 24000, 1);
        assert!(call.finish_recording().is_none());
    }

    #[tokio::test]
    async fn test_finish_after_streaming_yields_wav() {
        let output = MockAudioOutput::new();
        let clock = output.clone();
        let (mut call, _transport) = session(output, MockAudioSource::new()).await;
        call.start_streaming(1024, 4).await.unwrap();
        call.play_chunk(&pcm(2400), 24000, 1);
        clock.set_time(0.1);

        let artifact = call.finish_recording().unwrap();
        assert_eq!(artifact.mime, "audio/wav");
        assert!((artifact.duration - 0.1).abs() < 1e-3);
        call.teardown().await;
    }
}
