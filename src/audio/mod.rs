//! Audio capture, PCM encoding, and playback
//!
//! Capture and playback own the cpal device handles; PCM conversion is
//! pure and shared by both directions of the pipeline.

mod capture;
pub mod pcm;
mod playback;

pub use capture::{AudioFrame, FrameProducer};
pub use playback::{DecodedAudio, PlaybackController, PlaybackEvent, decode};
