//! Session state and the conversation orchestrator

mod orchestrator;
mod state;

pub use orchestrator::{
    AudioSink, CaptureCommand, Orchestrator, SessionEvent, StatusUpdate, bridge_playback,
};
pub use state::{ConversationTurn, PipelineState, Role, SessionState};
