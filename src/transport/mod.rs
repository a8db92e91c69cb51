//! Live session contract with the hosted conversational model.

pub mod mock;
pub mod protocol;
#[cfg(feature = "live")]
pub mod websocket;

use crate::defaults;
use crate::error::Result;
use crate::pipeline::types::PcmChunk;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Inbound events from a live session.
///
/// No ordering is guaranteed between `PartialAssistant` and `AudioChunk` of
/// the same turn, and `Error` may arrive instead of `Opened`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened,
    PartialUser(String),
    PartialAssistant(String),
    TurnComplete,
    /// Raw 16-bit PCM at the output rate, already base64-decoded.
    AudioChunk(Vec<u8>),
    Error(String),
    Closed,
}

/// Receiving half of a session's event stream.
pub type EventStream = mpsc::Receiver<SessionEvent>;

/// Everything needed to open one live session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub api_key: String,
    pub system_instruction: String,
    /// Bound on the handshake and on the wait for `Opened`.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(api_key: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            endpoint: defaults::LIVE_ENDPOINT.to_string(),
            model: defaults::LIVE_MODEL.to_string(),
            voice: defaults::VOICE_NAME.to_string(),
            api_key: api_key.into(),
            system_instruction: system_instruction.into(),
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
        }
    }
}

/// Opens live sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and return the session handle plus its event stream.
    ///
    /// Returns early with `PraniError::Connection` if `cancel` fires.
    async fn connect(
        &self,
        config: &SessionConfig,
        cancel: CancellationToken,
    ) -> Result<(Box<dyn LiveSession>, EventStream)>;
}

/// One open live session.
#[async_trait]
pub trait LiveSession: Send {
    /// Queue a chunk for transmission. Never blocks; chunks go out in call order.
    fn send(&mut self, chunk: PcmChunk) -> Result<()>;

    /// Close the session. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
