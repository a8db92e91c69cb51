//! WebSocket implementation of the live session.
//!
//! One reader task turns server frames into events. One writer task owns the
//! sink half and drains the outbound queue, so chunks leave in send order.

use crate::error::{PraniError, Result};
use crate::pipeline::types::PcmChunk;
use crate::transport::protocol::{parse_server_message, realtime_input, setup_message};
use crate::transport::{EventStream, LiveSession, SessionConfig, SessionEvent, Transport};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const EVENT_QUEUE: usize = 256;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Outbound {
    Chunk(PcmChunk),
    Close,
}

/// Connects to the hosted live endpoint.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

fn endpoint_url(config: &SessionConfig) -> String {
    let separator = if config.endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", config.endpoint, separator, config.api_key)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        config: &SessionConfig,
        cancel: CancellationToken,
    ) -> Result<(Box<dyn LiveSession>, EventStream)> {
        if config.api_key.is_empty() {
            return Err(PraniError::Connection {
                message: "no API key configured".to_string(),
            });
        }

        let url = endpoint_url(config);
        tracing::info!(endpoint = %config.endpoint, model = %config.model, "Connecting live session");

        let setup = serde_json::to_string(&setup_message(config)).map_err(|e| {
            PraniError::Protocol {
                message: format!("Failed to encode setup: {}", e),
            }
        })?;

        let handshake = async {
            let (ws, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
                PraniError::Connection {
                    message: format!("WebSocket handshake failed: {}", e),
                }
            })?;
            let (mut write, read) = ws.split();
            write
                .send(Message::Text(setup.into()))
                .await
                .map_err(|e| PraniError::Connection {
                    message: format!("Failed to send setup: {}", e),
                })?;
            Ok::<_, PraniError>((write, read))
        };

        let (mut write, mut read) = tokio::select! {
            result = tokio::time::timeout(config.connect_timeout, handshake) => match result {
                Ok(streams) => streams?,
                Err(_) => {
                    return Err(PraniError::Connection {
                        message: format!(
                            "handshake timed out after {} ms",
                            config.connect_timeout.as_millis()
                        ),
                    });
                }
            },
            _ = cancel.cancelled() => {
                return Err(PraniError::Connection {
                    message: "connect cancelled".to_string(),
                });
            }
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

        let writer_events = events_tx.clone();
        let writer = tokio::spawn(async move {
            let mut sent: u64 = 0;
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outbound::Chunk(chunk) => {
                        let text = match serde_json::to_string(&realtime_input(&chunk)) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to encode audio chunk");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            let _ = writer_events
                                .send(SessionEvent::Error(format!("send failed: {}", e)))
                                .await;
                            break;
                        }
                        sent += 1;
                    }
                    Outbound::Close => break,
                }
            }
            tracing::debug!(chunks = sent, "Live session writer finished");
            if let Err(e) = write.send(Message::Close(None)).await {
                tracing::debug!(error = %e, "Close frame not delivered");
            }
            let _ = write.close().await;
        });

        let reader_cancel = cancel.child_token();
        let setup_timeout = config.connect_timeout;
        let reader = tokio::spawn(async move {
            let setup_deadline = tokio::time::sleep(setup_timeout);
            tokio::pin!(setup_deadline);
            let mut opened = false;

            loop {
                let frame = tokio::select! {
                    frame = read.next() => frame,
                    _ = reader_cancel.cancelled() => break,
                    _ = &mut setup_deadline, if !opened => {
                        tracing::warn!(timeout_ms = setup_timeout.as_millis() as u64, "Setup not acknowledged");
                        let _ = events_tx
                            .send(SessionEvent::Error(format!(
                                "setup not acknowledged within {} ms",
                                setup_timeout.as_millis()
                            )))
                            .await;
                        break;
                    }
                };

                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!(len = bytes.len(), "Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(reason = ?frame, "Live session closed by server");
                        let _ = events_tx.send(SessionEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events_tx.send(SessionEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = events_tx.send(SessionEvent::Closed).await;
                        break;
                    }
                };

                match parse_server_message(&text) {
                    Ok(events) => {
                        for event in events {
                            opened |= event == SessionEvent::Opened;
                            if events_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring server frame"),
                }
            }
        });

        let session = WebSocketSession {
            outbound: Some(outbound_tx),
            writer: Some(writer),
            reader: Some(reader),
        };
        Ok((Box::new(session), events_rx))
    }
}

/// Handle to an open WebSocket session.
pub struct WebSocketSession {
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl LiveSession for WebSocketSession {
    fn send(&mut self, chunk: PcmChunk) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or_else(|| PraniError::Connection {
            message: "session is closed".to_string(),
        })?;
        outbound
            .send(Outbound::Chunk(chunk))
            .map_err(|_| PraniError::Connection {
                message: "session writer has stopped".to_string(),
            })
    }

    async fn close(&mut self) -> Result<()> {
        let Some(outbound) = self.outbound.take() else {
            return Ok(());
        };
        let _ = outbound.send(Outbound::Close);
        drop(outbound);

        let mut result = Ok(());
        if let Some(writer) = self.writer.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    result = Err(PraniError::SessionClose {
                        message: format!("writer task failed: {}", e),
                    });
                }
                Err(_) => {
                    result = Err(PraniError::SessionClose {
                        message: "timed out waiting for close".to_string(),
                    });
                }
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        result
    }

    fn is_closed(&self) -> bool {
        self.outbound.is_none()
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}
