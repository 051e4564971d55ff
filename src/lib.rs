//! voxbridge - Real-time voice conversation pipeline and STT relay
//!
//! This library provides the core of a voice conversation system:
//! - Audio capture, PCM encoding, and playback
//! - A streaming transcription client and its relay-side counterpart
//! - The conversation state machine (listen → query → speak → interrupt)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                       Client                          │
//! │  Capture │ PCM encode │ STT client │ Orchestrator │ Playback
//! └───────────────────────────┬──────────────────────────┘
//!                             │ WebSocket
//! ┌───────────────────────────▼──────────────────────────┐
//! │                     Relay Proxy                       │
//! │      client leg  ⇄  normalization  ⇄  provider leg   │
//! └───────────────────────────┬──────────────────────────┘
//!                             │
//! ┌───────────────────────────▼──────────────────────────┐
//! │              STT provider (streaming)                 │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod relay;
pub mod session;
pub mod stt;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Orchestrator, SessionEvent, SessionState, StatusUpdate};
pub use stt::{TranscriptEvent, TranscriptionClient};
