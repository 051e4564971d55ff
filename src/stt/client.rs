//! Streaming transcription client
//!
//! Owns one WebSocket connection to the relay per session. Frames go out
//! through a bounded queue drained by a writer task; transcript events
//! come back in transport order, stamped with a per-session sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::types::{ClientControl, RelayMessage, SttEvent, TranscriptEvent};
use crate::{Error, Result};

/// Frames queued between `send_frame` and the transport writer
const SEND_QUEUE: usize = 32;

enum Outbound {
    Frame(Vec<u8>),
    Stop,
}

/// Streaming transcription client: one transport connection per session
#[derive(Default)]
pub struct TranscriptionClient {
    outbound: Option<mpsc::Sender<Outbound>>,
    stopped: bool,
    dropped: Arc<AtomicU64>,
}

impl TranscriptionClient {
    /// Create an unstarted client; `send_frame` is a no-op until `start`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the transport connection and begin the stream
    ///
    /// Any previous connection is stopped first. Transcript and
    /// lifecycle events are delivered on `events` in transport order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the transport cannot be
    /// established or the start control frame cannot be sent.
    pub async fn start(
        &mut self,
        relay_url: &str,
        language: &str,
        format: &str,
        events: mpsc::Sender<SttEvent>,
    ) -> Result<()> {
        self.stop().await;
        self.stopped = false;

        let (ws, _) = connect_async(relay_url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let start = serde_json::to_string(&ClientControl::Start {
            language: language.to_string(),
            format: format.to_string(),
        })?;
        sink.send(Message::Text(start.into()))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        tracing::debug!(relay_url, language, "transcription stream started");

        let (tx, mut rx) = mpsc::channel::<Outbound>(SEND_QUEUE);
        self.outbound = Some(tx);

        // Writer: drain the bounded queue into the socket
        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                match out {
                    Outbound::Frame(pcm) => {
                        if sink.send(Message::Binary(pcm.into())).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Stop => {
                        if let Ok(stop) = serde_json::to_string(&ClientControl::Stop) {
                            let _ = sink.send(Message::Text(stop.into())).await;
                        }
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Reader: forward events in the order the transport delivers them
        let sequence = AtomicU64::new(0);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<RelayMessage>(text.as_str()) {
                            Ok(RelayMessage::Ready) => {
                                if events.send(SttEvent::Ready).await.is_err() {
                                    return;
                                }
                            }
                            Ok(RelayMessage::Partial { transcript }) => {
                                let event = TranscriptEvent {
                                    text: transcript,
                                    is_final: false,
                                    sequence: sequence.fetch_add(1, Ordering::Relaxed),
                                };
                                if events.send(SttEvent::Transcript(event)).await.is_err() {
                                    return;
                                }
                            }
                            Ok(RelayMessage::Final { transcript }) => {
                                let event = TranscriptEvent {
                                    text: transcript,
                                    is_final: true,
                                    sequence: sequence.fetch_add(1, Ordering::Relaxed),
                                };
                                if events.send(SttEvent::Transcript(event)).await.is_err() {
                                    return;
                                }
                            }
                            Ok(RelayMessage::Error { error }) => {
                                if events.send(SttEvent::Error(error)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                // Malformed message: drop it, the session continues
                                tracing::debug!(error = %e, "dropping undecodable relay message");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(SttEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            let _ = events.send(SttEvent::Closed).await;
        });

        Ok(())
    }

    /// Enqueue a PCM frame for transmission
    ///
    /// No-op before `start` or after `stop`. Never blocks: when the
    /// transport is backed up the frame is dropped and counted.
    pub fn send_frame(&self, pcm: Vec<u8>) {
        if self.stopped {
            return;
        }
        let Some(tx) = &self.outbound else {
            return;
        };
        match tx.try_send(Outbound::Frame(pcm)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    tracing::warn!(dropped = n, "transport backed up, dropping frames");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Send end-of-stream and close the transport; idempotent
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(Outbound::Stop).await;
            tracing::debug!(
                dropped = self.dropped.load(Ordering::Relaxed),
                "transcription stream stopped"
            );
        }
    }

    /// Frames dropped under backpressure since `start`
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_before_start_is_a_noop() {
        let client = TranscriptionClient::new();
        client.send_frame(vec![0u8; 640]);
        assert_eq!(client.dropped(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        tokio_test::block_on(async {
            let mut client = TranscriptionClient::new();
            client.stop().await;
            client.stop().await;
            client.send_frame(vec![1, 2, 3]);
            assert_eq!(client.dropped(), 0);
        });
    }
}
