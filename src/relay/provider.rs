//! Provider-leg protocol for the relay
//!
//! The STT provider speaks a Deepgram-style streaming protocol: stream
//! parameters ride the connection URL, raw audio goes out as binary
//! frames, results come back as JSON, and end-of-stream is an explicit
//! `CloseStream` text frame. Everything provider-shaped is normalized
//! into [`RelayMessage`] here and nowhere else.

use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::stt::RelayMessage;
use crate::{Config, Error, Result};

/// The provider-facing WebSocket connection
pub type ProviderSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters for the STT provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Streaming endpoint base URL
    pub url: String,
    /// Credential sent as an Authorization header
    pub api_key: Option<String>,
    /// Sample rate the audio frames carry
    pub sample_rate: u32,
    /// Default recognition language
    pub language: String,
}

impl ProviderConfig {
    /// Derive provider parameters from the shared configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.provider_url.clone(),
            api_key: config.provider_key.clone(),
            sample_rate: config.target_rate,
            language: config.language.clone(),
        }
    }

    /// Build the stream URL with the provider's query-string parameters
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the base URL does not parse.
    pub fn stream_url(&self, language: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url).map_err(|e| Error::Config(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", &self.sample_rate.to_string())
            .append_pair("language", language)
            .append_pair("interim_results", "true")
            .append_pair("punctuate", "true");
        Ok(url)
    }

    /// Open the provider connection for one session
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the provider is unreachable or
    /// rejects the handshake.
    pub async fn connect(&self, language: &str) -> Result<ProviderSocket> {
        let url = self.stream_url(language)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Connection(e.to_string()))?;

        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Token {key}"))
                .map_err(|e| Error::Config(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        tracing::debug!(url = %url, "provider connection established");
        Ok(socket)
    }
}

/// The provider's end-of-stream control frame
#[must_use]
pub fn close_stream_message() -> Message {
    Message::Text(r#"{"type":"CloseStream"}"#.to_string().into())
}

#[derive(Deserialize)]
struct RawProviderEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    channel: Option<RawChannel>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct RawChannel {
    alternatives: Vec<RawAlternative>,
}

#[derive(Deserialize)]
struct RawAlternative {
    transcript: String,
}

/// Normalize one provider text frame into the closed internal shape
///
/// Returns `None` for housekeeping events (metadata, utterance markers)
/// and for frames that do not decode; the caller drops those and the
/// session continues.
#[must_use]
pub fn normalize(text: &str) -> Option<RelayMessage> {
    let event: RawProviderEvent = serde_json::from_str(text).ok()?;

    match event.kind.as_str() {
        "Results" => {
            let transcript = event
                .channel?
                .alternatives
                .into_iter()
                .next()
                .map(|a| a.transcript)?;
            if event.is_final {
                Some(RelayMessage::Final { transcript })
            } else {
                Some(RelayMessage::Partial { transcript })
            }
        }
        "Error" => Some(RelayMessage::Error {
            error: event
                .description
                .unwrap_or_else(|| "provider error".to_string()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            url: "wss://stt.example.com/v1/listen".to_string(),
            api_key: Some("secret".to_string()),
            sample_rate: 16_000,
            language: "en".to_string(),
        }
    }

    #[test]
    fn stream_url_carries_parameters() {
        let url = test_config().stream_url("pt").unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("encoding=linear16"));
        assert!(query.contains("sample_rate=16000"));
        assert!(query.contains("language=pt"));
    }

    #[test]
    fn normalizes_partial_result() {
        let raw = r#"{"type":"Results","is_final":false,"channel":{"alternatives":[{"transcript":"Ol"}]}}"#;
        assert_eq!(
            normalize(raw),
            Some(RelayMessage::Partial {
                transcript: "Ol".to_string()
            })
        );
    }

    #[test]
    fn normalizes_final_result() {
        let raw = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[{"transcript":"Olá"}]}}"#;
        assert_eq!(
            normalize(raw),
            Some(RelayMessage::Final {
                transcript: "Olá".to_string()
            })
        );
    }

    #[test]
    fn normalizes_provider_error() {
        let raw = r#"{"type":"Error","description":"bad audio"}"#;
        assert_eq!(
            normalize(raw),
            Some(RelayMessage::Error {
                error: "bad audio".to_string()
            })
        );
    }

    #[test]
    fn drops_metadata_and_garbage() {
        assert_eq!(normalize(r#"{"type":"Metadata","duration":1.5}"#), None);
        assert_eq!(normalize("not json"), None);
        assert_eq!(normalize(r#"{"type":"Results","is_final":true}"#), None);
    }

    #[test]
    fn close_stream_is_a_text_frame() {
        let msg = close_stream_message();
        assert!(matches!(msg, Message::Text(t) if t.as_str().contains("CloseStream")));
    }
}
