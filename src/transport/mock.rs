//! Scripted transport for tests.

use crate::error::{PraniError, Result};
use crate::pipeline::types::PcmChunk;
use crate::transport::{EventStream, LiveSession, SessionConfig, SessionEvent, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SCRIPT_CAPACITY: usize = 64;

/// What one connect attempt does.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// `connect` itself fails with a connection error.
    Fail(String),
    /// `connect` succeeds and the events are delivered right away. The
    /// stream then stays open until the session is closed.
    Events(Vec<SessionEvent>),
    /// `connect` never completes on its own, like a stalled handshake. It
    /// returns a connection error once cancelled.
    Hang,
}

/// Observable state shared by a [`MockTransport`] and its sessions.
#[derive(Debug, Default)]
pub struct MockTransportState {
    pub connects: u32,
    pub configs: Vec<SessionConfig>,
    pub sent: Vec<PcmChunk>,
    pub close_calls: u32,
    pub open_sessions: u32,
    /// Connect attempts that ended because their token was cancelled.
    pub cancelled_connects: u32,
    live_sender: Option<mpsc::UnboundedSender<SessionEvent>>,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    scripts: Arc<Mutex<VecDeque<ConnectScript>>>,
    state: Arc<Mutex<MockTransportState>>,
    fail_close: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behaviour of the next connect attempt.
    pub fn with_script(self, script: ConnectScript) -> Self {
        lock(&self.scripts).push_back(script);
        self
    }

    /// Shorthand for a session that opens and then waits.
    pub fn with_open_session(self) -> Self {
        self.with_script(ConnectScript::Events(vec![SessionEvent::Opened]))
    }

    /// Make every `close` report a close failure.
    pub fn with_close_failure(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn state(&self) -> Arc<Mutex<MockTransportState>> {
        Arc::clone(&self.state)
    }

    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    pub fn sent(&self) -> Vec<PcmChunk> {
        lock(&self.state).sent.clone()
    }

    /// Push an event into the most recently opened session.
    ///
    /// Returns false if no session is open.
    pub fn emit(&self, event: SessionEvent) -> bool {
        lock(&self.state)
            .live_sender
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        config: &SessionConfig,
        cancel: CancellationToken,
    ) -> Result<(Box<dyn LiveSession>, EventStream)> {
        {
            let mut state = lock(&self.state);
            state.connects += 1;
            state.configs.push(config.clone());
        }
        if cancel.is_cancelled() {
            return Err(PraniError::Connection {
                message: "connect cancelled".to_string(),
            });
        }

        let script = lock(&self.scripts)
            .pop_front()
            .unwrap_or(ConnectScript::Fail("no scripted session".to_string()));

        let events = match script {
            ConnectScript::Fail(message) => return Err(PraniError::Connection { message }),
            ConnectScript::Events(events) => events,
            ConnectScript::Hang => {
                cancel.cancelled().await;
                lock(&self.state).cancelled_connects += 1;
                return Err(PraniError::Connection {
                    message: "connect cancelled".to_string(),
                });
            }
        };

        // Scripted events are queued before connect returns; injected ones
        // follow through a forwarding task.
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(SCRIPT_CAPACITY.max(events.len()));
        for event in events {
            let _ = events_tx.try_send(event);
        }
        tokio::spawn(async move {
            while let Some(event) = inject_rx.recv().await {
                if events_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        {
            let mut state = lock(&self.state);
            state.open_sessions += 1;
            state.live_sender = Some(inject_tx.clone());
        }

        let session = MockLiveSession {
            state: Arc::clone(&self.state),
            inject: Some(inject_tx),
            fail_close: self.fail_close,
        };
        Ok((Box::new(session), events_rx))
    }
}

pub struct MockLiveSession {
    state: Arc<Mutex<MockTransportState>>,
    inject: Option<mpsc::UnboundedSender<SessionEvent>>,
    fail_close: bool,
}

#[async_trait]
impl LiveSession for MockLiveSession {
    fn send(&mut self, chunk: PcmChunk) -> Result<()> {
        if self.inject.is_none() {
            return Err(PraniError::Connection {
                message: "session is closed".to_string(),
            });
        }
        lock(&self.state).sent.push(chunk);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.close_calls += 1;
        if let Some(inject) = self.inject.take() {
            state.open_sessions = state.open_sessions.saturating_sub(1);
            if state
                .live_sender
                .as_ref()
                .is_some_and(|live| live.same_channel(&inject))
            {
                state.live_sender = None;
            }
        }
        if self.fail_close {
            return Err(PraniError::SessionClose {
                message: "mock close failure".to_string(),
            });
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inject.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("key", "instruction")
    }

    #[tokio::test]
    async fn test_scripted_events_are_delivered_in_order() {
        let transport = MockTransport::new().with_script(ConnectScript::Events(vec![
            SessionEvent::Opened,
            SessionEvent::PartialUser("hi".to_string()),
        ]));

        let (_session, mut events) = transport
            .connect(&config(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(events.recv().await, Some(SessionEvent::Opened));
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::PartialUser("hi".to_string()))
        );
        assert!(transport.emit(SessionEvent::TurnComplete));
        assert_eq!(events.recv().await, Some(SessionEvent::TurnComplete));
    }

    #[tokio::test]
    async fn test_failed_script_returns_connection_error() {
        let transport = MockTransport::new().with_script(ConnectScript::Fail("refused".to_string()));
        let result = transport.connect(&config(), CancellationToken::new()).await;

        assert!(matches!(result, Err(PraniError::Connection { .. })));
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn test_hanging_connect_returns_once_cancelled() {
        let transport = MockTransport::new().with_script(ConnectScript::Hang);
        let cancel = CancellationToken::new();
        let connect = {
            let transport = transport.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { transport.connect(&config(), cancel).await.is_err() })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!connect.is_finished(), "connect resolved without cancellation");

        cancel.cancel();
        assert!(connect.await.unwrap());
        assert_eq!(transport.state().lock().unwrap().cancelled_connects, 1);
    }

    #[tokio::test]
    async fn test_unscripted_connect_fails() {
        let transport = MockTransport::new();
        assert!(
            transport
                .connect(&config(), CancellationToken::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_stream() {
        let transport = MockTransport::new().with_open_session();
        let (mut session, mut events) = transport
            .connect(&config(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::Opened));

        session.close().await.unwrap();
        session.close().await.unwrap();

        assert!(session.is_closed());
        assert!(!transport.emit(SessionEvent::Closed));
        assert_eq!(events.recv().await, None);
        let state = transport.state();
        let state = state.lock().unwrap();
        assert_eq!(state.close_calls, 2);
        assert_eq!(state.open_sessions, 0);
    }

    #[tokio::test]
    async fn test_send_records_chunks_until_closed() {
        let transport = MockTransport::new().with_open_session();
        let (mut session, _events) = transport
            .connect(&config(), CancellationToken::new())
            .await
            .unwrap();

        let chunk = PcmChunk {
            data: vec![1, 2],
            mime: "audio/pcm;rate=16000".to_string(),
            sequence: 0,
        };
        session.send(chunk.clone()).unwrap();
        session.close().await.unwrap();

        assert!(session.send(chunk.clone()).is_err());
        assert_eq!(transport.sent(), vec![chunk]);
    }
}
