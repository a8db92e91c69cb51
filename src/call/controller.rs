//! Async driver for one call.
//!
//! A single task owns the [`CallSession`], the turn reconciler and the state
//! machine. Everything else talks to it over channels: capture frames, session
//! events, and commands from [`CallHandle`]. The machine decides, the
//! controller performs the resulting [`CallAction`]s in order.

use crate::audio::AudioDevices;
use crate::call::session::CallSession;
use crate::call::state::{CallAction, CallInput, CallMachine, CallStatus, RetryPolicy};
use crate::call::turn::{PendingTurn, Transcript, TranscriptEntry, TurnReconciler};
use crate::defaults;
use crate::error::PraniError;
use crate::pipeline::AudioFrame;
use crate::questions::QuestionSink;
use crate::recording::{RecordingArtifact, RecordingMixer};
use crate::transport::{SessionConfig, SessionEvent, Transport};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long an abandoned connect may take to release its devices.
const ABANDON_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables of the streaming pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    pub frame_samples: usize,
    pub queue_frames: usize,
    pub output_rate: u32,
    pub output_channels: u16,
    pub retry: RetryPolicy,
    /// Seconds the recorder stays behind the output clock.
    pub flush_lag: f64,
    pub housekeeping_interval: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            frame_samples: defaults::CAPTURE_FRAME_SAMPLES,
            queue_frames: defaults::CAPTURE_QUEUE_FRAMES,
            output_rate: defaults::OUTPUT_SAMPLE_RATE,
            output_channels: defaults::OUTPUT_CHANNELS,
            retry: RetryPolicy::default(),
            flush_lag: defaults::RECORDER_FLUSH_LAG_SECS,
            housekeeping_interval: Duration::from_millis(defaults::HOUSEKEEPING_INTERVAL_MS),
        }
    }
}

/// What a finished call hands over.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnd {
    pub transcript: Transcript,
    /// `None` if the call ended before streaming started.
    pub recording: Option<RecordingArtifact>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Ended(CallEnd),
    /// Gave up after the retry budget; the user did not retry.
    Failed { reason: String, transcript: Transcript },
    PermissionDenied { message: String },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    End,
    Retry,
}

/// Progress notifications for a front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum CallUpdate {
    Status(CallStatus),
    /// Text received so far for the turn in progress.
    Pending(PendingTurn),
    Entry(TranscriptEntry),
    Error(String),
}

/// Cloneable remote control for a running call.
#[derive(Debug, Clone)]
pub struct CallControl {
    commands: mpsc::UnboundedSender<CallCommand>,
    cancel: CancellationToken,
}

impl CallControl {
    /// Ask for a graceful end. Returns false once the call is gone.
    pub fn end(&self) -> bool {
        self.commands.send(CallCommand::End).is_ok()
    }

    /// Ask for a manual retry from a failed state.
    pub fn retry(&self) -> bool {
        self.commands.send(CallCommand::Retry).is_ok()
    }

    /// Abandon the call. Resources are torn down and no result is applied.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct CallHandle {
    control: CallControl,
    task: JoinHandle<CallOutcome>,
}

impl CallHandle {
    pub fn control(&self) -> CallControl {
        self.control.clone()
    }

    pub fn end(&self) -> bool {
        self.control.end()
    }

    pub fn retry(&self) -> bool {
        self.control.retry()
    }

    pub fn dispose(&self) {
        self.control.dispose();
    }

    /// Wait for the call to finish.
    pub async fn wait(self) -> CallOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Call task failed");
                CallOutcome::Failed {
                    reason: format!("call task failed: {e}"),
                    transcript: Transcript::new(),
                }
            }
        }
    }
}

/// Why a connect or backoff wait stopped early.
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    EndRequested,
}

enum Wake {
    Cancelled,
    Event(Option<SessionEvent>),
    Frame(Option<AudioFrame>),
    Command(Option<CallCommand>),
    Tick,
}

pub struct CallController {
    transport: Arc<dyn Transport>,
    devices: Arc<dyn AudioDevices>,
    config: SessionConfig,
    options: CallOptions,
    questions: Option<Box<dyn QuestionSink>>,
    updates: Option<mpsc::UnboundedSender<CallUpdate>>,
}

impl CallController {
    pub fn new(
        transport: Arc<dyn Transport>,
        devices: Arc<dyn AudioDevices>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            devices,
            config,
            options: CallOptions::default(),
            questions: None,
            updates: None,
        }
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Log every committed user question to `sink`.
    pub fn with_question_sink(mut self, sink: Box<dyn QuestionSink>) -> Self {
        self.questions = Some(sink);
        self
    }

    /// Publish status changes, committed entries and errors.
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<CallUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Spawn the call on the current runtime.
    pub fn spawn(self) -> CallHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let control = CallControl {
            commands: commands_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(self.run(commands_rx, cancel));
        CallHandle { control, task }
    }

    /// Drive the call until it ends, fails for good, or is cancelled.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<CallCommand>,
        cancel: CancellationToken,
    ) -> CallOutcome {
        let mut machine = CallMachine::new(self.options.retry);
        let mut turns = TurnReconciler::new();
        let mut call: Option<CallSession> = None;
        let mut recording: Option<RecordingArtifact> = None;
        let mut failure: Option<CallOutcome> = None;
        let mut ended: Option<CallEnd> = None;
        let mut pending: VecDeque<CallAction> = machine.begin().into();

        let mut tick = tokio::time::interval(self.options.housekeeping_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.publish(CallUpdate::Status(machine.status()));
        tracing::info!(model = %self.config.model, "Starting call");

        loop {
            while let Some(action) = pending.pop_front() {
                if cancel.is_cancelled() {
                    return self.cancelled(&mut call).await;
                }
                tracing::debug!(?action, status = %machine.status(), "Performing call action");

                let follow_up = match action {
                    CallAction::Connect => {
                        let attempt = cancel.child_token();
                        let work = self.connect(&attempt);
                        tokio::pin!(work);
                        match until_interrupted(work.as_mut(), &mut commands, &cancel).await {
                            Ok(Ok(session)) => {
                                call = Some(session);
                                None
                            }
                            Ok(Err(input)) => Some(input),
                            Err(interrupt) => {
                                // Let the attempt release what it opened
                                attempt.cancel();
                                match tokio::time::timeout(ABANDON_TIMEOUT, work).await {
                                    Ok(Ok(session)) => call = Some(session),
                                    Ok(Err(_)) => {}
                                    Err(_) => tracing::warn!("Abandoned connect did not return"),
                                }
                                match interrupt {
                                    Interrupt::Cancelled => return self.cancelled(&mut call).await,
                                    Interrupt::EndRequested => {
                                        pending.clear();
                                        Some(CallInput::EndRequested)
                                    }
                                }
                            }
                        }
                    }
                    CallAction::StartStreaming => {
                        let mut input = None;
                        if let Some(session) = call.as_mut()
                            && let Err(e) = session
                                .start_streaming(self.options.frame_samples, self.options.queue_frames)
                                .await
                        {
                            tracing::error!(error = %e, "Failed to start microphone capture");
                            input = Some(match e {
                                PraniError::PermissionDenied { message } => {
                                    CallInput::PermissionDenied(message)
                                }
                                other => CallInput::SessionError(other.to_string()),
                            });
                        }
                        input
                    }
                    CallAction::Backoff(delay) => {
                        tracing::info!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                        let sleep = tokio::time::sleep(delay);
                        tokio::pin!(sleep);
                        match until_interrupted(sleep.as_mut(), &mut commands, &cancel).await {
                            Ok(()) => None,
                            Err(Interrupt::Cancelled) => return self.cancelled(&mut call).await,
                            Err(Interrupt::EndRequested) => {
                                pending.clear();
                                Some(CallInput::EndRequested)
                            }
                        }
                    }
                    CallAction::CloseSession => {
                        if let Some(session) = call.as_mut() {
                            session.close().await;
                        }
                        None
                    }
                    CallAction::FinishRecording => {
                        recording = call.as_mut().and_then(CallSession::finish_recording);
                        None
                    }
                    CallAction::Teardown => {
                        if let Some(mut session) = call.take() {
                            session.teardown().await;
                        }
                        None
                    }
                    CallAction::EndCall => {
                        ended = Some(CallEnd {
                            transcript: turns.transcript().clone(),
                            recording: recording.take(),
                        });
                        None
                    }
                    CallAction::Fail(reason) => {
                        tracing::error!(status = %machine.status(), reason = %reason, "Call failed");
                        self.publish(CallUpdate::Error(reason.clone()));
                        failure = Some(if machine.status() == CallStatus::PermissionDenied {
                            CallOutcome::PermissionDenied { message: reason }
                        } else {
                            CallOutcome::Failed {
                                reason,
                                transcript: turns.transcript().clone(),
                            }
                        });
                        None
                    }
                };

                if let Some(input) = follow_up {
                    self.step(&mut machine, &mut pending, input);
                }
            }

            if let Some(end) = ended.take() {
                tracing::info!(
                    entries = end.transcript.len(),
                    recorded = end.recording.is_some(),
                    "Call ended"
                );
                return CallOutcome::Ended(end);
            }

            if machine.status().is_terminal() {
                let command = tokio::select! {
                    _ = cancel.cancelled() => return self.cancelled(&mut call).await,
                    command = commands.recv() => command,
                };
                match command {
                    Some(CallCommand::Retry) => {
                        failure = None;
                        self.step(&mut machine, &mut pending, CallInput::RetryRequested);
                    }
                    Some(CallCommand::End) | None => {
                        return failure.unwrap_or(CallOutcome::Failed {
                            reason: "call failed".to_string(),
                            transcript: turns.into_transcript(),
                        });
                    }
                }
                continue;
            }

            let wake = next_wake(&mut call, &mut commands, &cancel, &mut tick).await;
            match wake {
                Wake::Cancelled => return self.cancelled(&mut call).await,
                Wake::Event(Some(event)) => {
                    if let Some(input) = self.on_event(event, call.as_mut(), &mut turns) {
                        self.step(&mut machine, &mut pending, input);
                    }
                }
                Wake::Event(None) => {
                    if let Some(session) = call.as_mut() {
                        session.events = None;
                    }
                    self.step(&mut machine, &mut pending, CallInput::Closed);
                }
                Wake::Frame(Some(frame)) => {
                    if let Some(session) = call.as_mut() {
                        session.send_frame(frame);
                    }
                }
                Wake::Frame(None) => {
                    if let Some(session) = call.as_mut() {
                        session.on_capture_ended();
                    }
                }
                Wake::Command(Some(CallCommand::End)) | Wake::Command(None) => {
                    self.step(&mut machine, &mut pending, CallInput::EndRequested);
                }
                Wake::Command(Some(CallCommand::Retry)) => {
                    self.step(&mut machine, &mut pending, CallInput::RetryRequested);
                }
                Wake::Tick => {
                    if let Some(session) = call.as_mut() {
                        session.housekeeping();
                    }
                }
            }
        }
    }

    fn step(&self, machine: &mut CallMachine, pending: &mut VecDeque<CallAction>, input: CallInput) {
        let before = machine.status();
        pending.extend(machine.step(input));
        let after = machine.status();
        if before != after {
            tracing::info!(from = %before, to = %after, "Call status changed");
            self.publish(CallUpdate::Status(after));
        }
    }

    /// Open fresh audio contexts, ask for the microphone, then connect.
    async fn connect(&self, cancel: &CancellationToken) -> Result<CallSession, CallInput> {
        let mut input = self
            .devices
            .open_input()
            .map_err(|e| classify_connect_error(&e))?;

        if let Err(e) = input.request_permission() {
            if let Err(stop) = input.stop() {
                tracing::debug!(error = %stop, "Failed to release refused microphone");
            }
            return Err(classify_connect_error(&e));
        }

        let mut output = match self.devices.open_output() {
            Ok(output) => output,
            Err(e) => {
                if let Err(stop) = input.stop() {
                    tracing::debug!(error = %stop, "Failed to release microphone");
                }
                return Err(classify_connect_error(&e));
            }
        };

        match self.transport.connect(&self.config, cancel.clone()).await {
            Ok((session, events)) => {
                let mixer = RecordingMixer::new(output.sample_rate(), input.sample_rate())
                    .with_flush_lag(self.options.flush_lag);
                Ok(CallSession::new(input, output, session, events, mixer))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connect failed");
                if let Err(stop) = input.stop() {
                    tracing::debug!(error = %stop, "Failed to release microphone");
                }
                if let Err(close) = output.close() {
                    tracing::debug!(error = %close, "Failed to release audio output");
                }
                Err(classify_connect_error(&e))
            }
        }
    }

    fn on_event(
        &mut self,
        event: SessionEvent,
        call: Option<&mut CallSession>,
        turns: &mut TurnReconciler,
    ) -> Option<CallInput> {
        match event {
            SessionEvent::Opened => Some(CallInput::Opened),
            SessionEvent::Error(cause) => Some(CallInput::SessionError(cause)),
            SessionEvent::Closed => Some(CallInput::Closed),
            SessionEvent::PartialUser(text) => {
                turns.on_partial_user(&text);
                self.publish(CallUpdate::Pending(turns.pending().clone()));
                None
            }
            SessionEvent::PartialAssistant(text) => {
                turns.on_partial_assistant(&text);
                self.publish(CallUpdate::Pending(turns.pending().clone()));
                None
            }
            SessionEvent::TurnComplete => {
                let committed = turns.on_turn_complete();
                if let Some(user) = committed.user {
                    if let Some(sink) = self.questions.as_mut()
                        && let Err(e) = sink.log(&user.text)
                    {
                        tracing::warn!(error = %e, "Failed to log question");
                    }
                    self.publish(CallUpdate::Entry(user));
                }
                if let Some(assistant) = committed.assistant {
                    self.publish(CallUpdate::Entry(assistant));
                }
                None
            }
            SessionEvent::AudioChunk(bytes) => {
                if let Some(session) = call {
                    session.play_chunk(&bytes, self.options.output_rate, self.options.output_channels);
                }
                None
            }
        }
    }

    async fn cancelled(&self, call: &mut Option<CallSession>) -> CallOutcome {
        if let Some(mut session) = call.take() {
            session.teardown().await;
        }
        tracing::info!("Call disposed");
        CallOutcome::Cancelled
    }

    fn publish(&self, update: CallUpdate) {
        if let Some(updates) = &self.updates {
            let _ = updates.send(update);
        }
    }
}

fn classify_connect_error(error: &PraniError) -> CallInput {
    match error {
        PraniError::PermissionDenied { message } => CallInput::PermissionDenied(message.clone()),
        other => CallInput::ConnectFailed(other.to_string()),
    }
}

/// Await `work` while still honouring dispose and a user end.
///
/// A retry request cannot apply mid-attempt and is dropped.
async fn until_interrupted<F: Future>(
    mut work: Pin<&mut F>,
    commands: &mut mpsc::UnboundedReceiver<CallCommand>,
    cancel: &CancellationToken,
) -> Result<F::Output, Interrupt> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
            command = commands.recv() => match command {
                Some(CallCommand::Retry) => tracing::debug!("Retry ignored while connecting"),
                Some(CallCommand::End) | None => return Err(Interrupt::EndRequested),
            },
            output = work.as_mut() => return Ok(output),
        }
    }
}

async fn recv_opt<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_wake(
    call: &mut Option<CallSession>,
    commands: &mut mpsc::UnboundedReceiver<CallCommand>,
    cancel: &CancellationToken,
    tick: &mut tokio::time::Interval,
) -> Wake {
    let (events, frames) = match call.as_mut() {
        Some(session) => (session.events.as_mut(), session.frames.as_mut()),
        None => (None, None),
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Wake::Cancelled,
        event = recv_opt(events) => Wake::Event(event),
        frame = recv_opt(frames) => Wake::Frame(frame),
        command = commands.recv() => Wake::Command(command),
        _ = tick.tick() => Wake::Tick,
    }
}
