//! Downstream collaborators: question answering and speech synthesis

mod query;
mod synthesis;

pub use query::{HttpQueryBackend, QueryBackend};
pub use synthesis::{HttpSynthesizer, SpeechSynthesizer};
