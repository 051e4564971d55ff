//! Streaming transcription: wire types and the per-session client

mod client;
mod types;

pub use client::TranscriptionClient;
pub use types::{ClientControl, RelayMessage, SttEvent, TranscriptEvent};
