//! Question-answering backend client

use async_trait::async_trait;

use crate::{Error, Result};

/// Answers a finalized user utterance
///
/// The orchestrator owns the call timeout; implementations just perform
/// the request.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Ask one question and return the answer text
    async fn ask(&self, question: &str) -> Result<String>;
}

#[derive(serde::Serialize)]
struct QueryRequest<'a> {
    question: &'a str,
}

#[derive(serde::Deserialize)]
struct QueryResponse {
    answer: String,
}

/// HTTP query backend: POST `{question}` → `{answer}`
pub struct HttpQueryBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpQueryBackend {
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl QueryBackend for HttpQueryBackend {
    async fn ask(&self, question: &str) -> Result<String> {
        tracing::debug!(len = question.len(), "querying backend");

        let response = self
            .client
            .post(&self.url)
            .json(&QueryRequest { question })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("query backend {status}: {body}")));
        }

        let result: QueryResponse = response.json().await?;
        tracing::debug!(len = result.answer.len(), "query complete");
        Ok(result.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shape_matches_wire_contract() {
        let json = serde_json::to_string(&QueryRequest { question: "Olá" }).unwrap();
        assert_eq!(json, r#"{"question":"Olá"}"#);
    }

    #[test]
    fn response_shape_matches_wire_contract() {
        let parsed: QueryResponse = serde_json::from_str(r#"{"answer":"Oi!"}"#).unwrap();
        assert_eq!(parsed.answer, "Oi!");
    }
}
