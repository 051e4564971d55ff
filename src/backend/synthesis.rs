//! Speech-synthesis backend client

use async_trait::async_trait;

use crate::{Error, Result};

/// Synthesizes a reply to audio bytes (one fixed encoding, MPEG audio)
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` and return the encoded audio
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

#[derive(serde::Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
}

/// HTTP synthesis backend: POST `{text}` → audio bytes
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpSynthesizer {
    #[must_use]
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(len = text.len(), "synthesizing speech");

        let mut request = self.client.post(&self.url).json(&SynthesisRequest { text });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("synthesis backend {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }
}
