//! Configuration values for the voice pipeline and relay
//!
//! Values only — every setting comes from the environment with a
//! sensible default, and CLI flags may override individual fields.

use std::time::Duration;

/// Configuration consumed by the pipeline and relay
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay WebSocket endpoint the client connects to
    pub relay_url: String,

    /// STT provider streaming endpoint the relay bridges to
    pub provider_url: String,

    /// STT provider credential
    pub provider_key: Option<String>,

    /// Question-answering backend endpoint
    pub query_url: String,

    /// Speech-synthesis backend endpoint
    pub synth_url: String,

    /// Speech-synthesis backend credential
    pub synth_key: Option<String>,

    /// Sample rate the STT provider expects
    pub target_rate: u32,

    /// Recognition language code
    pub language: String,

    /// Audio format identifier declared to the relay
    pub format: String,

    /// Upper bound for each query/synthesis call
    pub call_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Reads from:
    /// - `VOXBRIDGE_RELAY_URL`: relay WebSocket endpoint
    /// - `VOXBRIDGE_PROVIDER_URL`: STT provider streaming endpoint
    /// - `VOXBRIDGE_PROVIDER_KEY`: STT provider credential
    /// - `VOXBRIDGE_QUERY_URL`: question-answering backend endpoint
    /// - `VOXBRIDGE_SYNTH_URL`: speech-synthesis backend endpoint
    /// - `VOXBRIDGE_SYNTH_KEY`: speech-synthesis credential
    /// - `VOXBRIDGE_TARGET_RATE`: provider sample rate (default 16000)
    /// - `VOXBRIDGE_LANGUAGE`: recognition language (default "en")
    /// - `VOXBRIDGE_CALL_TIMEOUT_SECS`: downstream call bound (default 30)
    #[must_use]
    pub fn from_env() -> Self {
        let target_rate = env_parse("VOXBRIDGE_TARGET_RATE", 16_000);

        Self {
            relay_url: env_or("VOXBRIDGE_RELAY_URL", "ws://127.0.0.1:8901/ws/listen"),
            provider_url: env_or("VOXBRIDGE_PROVIDER_URL", "wss://api.deepgram.com/v1/listen"),
            provider_key: std::env::var("VOXBRIDGE_PROVIDER_KEY").ok(),
            query_url: env_or("VOXBRIDGE_QUERY_URL", "http://127.0.0.1:8080/ask"),
            synth_url: env_or("VOXBRIDGE_SYNTH_URL", "http://127.0.0.1:8080/synthesize"),
            synth_key: std::env::var("VOXBRIDGE_SYNTH_KEY").ok(),
            target_rate,
            language: env_or("VOXBRIDGE_LANGUAGE", "en"),
            format: format!("audio/L16;rate={target_rate}"),
            call_timeout: Duration::from_secs(env_parse("VOXBRIDGE_CALL_TIMEOUT_SECS", 30)),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = Config::from_env();
        assert!(config.relay_url.starts_with("ws"));
        assert!(config.format.contains(&config.target_rate.to_string()));
        assert!(config.call_timeout >= Duration::from_secs(1));
    }
}
