//! Transcript events and relay wire messages
//!
//! The relay normalizes provider-specific shapes into this closed set of
//! variants; nothing past the relay boundary sees a provider payload.

use serde::{Deserialize, Serialize};

/// One partial or final recognition result
///
/// Partials are advisory and may be superseded; exactly one final event
/// closes an utterance. `sequence` increases monotonically per session
/// in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub sequence: u64,
}

/// Control message from client to relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControl {
    /// Begin a transcription stream
    Start {
        /// Recognition language code
        language: String,
        /// MIME identifier of the binary frames that follow
        format: String,
    },
    /// End the stream; the relay signals end-of-stream to the provider
    Stop,
}

/// Normalized message from relay to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Provider leg is established; audio will now be transcribed
    Ready,
    /// Provisional recognition result
    Partial { transcript: String },
    /// Authoritative recognition result closing the utterance
    Final { transcript: String },
    /// Connection or provider failure
    Error { error: String },
}

/// Lifecycle and transcript events surfaced by the transcription client
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// Transport connected and the provider leg is live
    Ready,
    /// A partial or final transcript, stamped with its session sequence
    Transcript(TranscriptEvent),
    /// Connection failure during an active session; session-ending
    /// unless the orchestrator decides otherwise
    Error(String),
    /// Transport closed
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_control_serializes() {
        let msg = ClientControl::Start {
            language: "pt".to_string(),
            format: "audio/L16;rate=16000".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"start\""));
        assert!(json.contains("\"language\":\"pt\""));
    }

    #[test]
    fn stop_control_round_trips() {
        let json = r#"{"type":"stop"}"#;
        let msg: ClientControl = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientControl::Stop));
    }

    #[test]
    fn relay_messages_use_tagged_shape() {
        let json = serde_json::to_string(&RelayMessage::Partial {
            transcript: "Ol".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"partial\""));
        assert!(json.contains("\"transcript\":\"Ol\""));

        let err: RelayMessage =
            serde_json::from_str(r#"{"type":"error","error":"provider unreachable"}"#).unwrap();
        assert_eq!(
            err,
            RelayMessage::Error {
                error: "provider unreachable".to_string()
            }
        );
    }

    #[test]
    fn ready_is_a_unit_variant() {
        let json = serde_json::to_string(&RelayMessage::Ready).unwrap();
        assert_eq!(json, r#"{"type":"ready"}"#);
    }
}
