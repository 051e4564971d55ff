//! Conversation orchestrator
//!
//! The state machine driving listen → transcribe → query → speak →
//! interrupt. Every transition enters through one serialized inbox and
//! is applied by the single task that owns the `SessionState`, so no
//! two transitions for a session ever race.
//!
//! Each downstream call is tagged with the sequence of the final
//! transcript that triggered it; a result arriving after the turn was
//! superseded (interrupt, error, new turn) fails the tag check and is
//! discarded without a state change. One final transcript triggers at
//! most one query call, and one query result triggers at most one
//! synthesis call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::state::{ConversationTurn, PipelineState, SessionState};
use crate::audio::{PlaybackController, PlaybackEvent};
use crate::backend::{QueryBackend, SpeechSynthesizer};
use crate::stt::TranscriptEvent;
use crate::{Error, Result};

/// Inbox depth; transitions are small and drain fast
const INBOX_DEPTH: usize = 64;

/// Events driving the session state machine
#[derive(Debug)]
pub enum SessionEvent {
    /// Input device access was granted; the session may arm
    PermissionGranted,
    /// The user asked to start capturing
    StartCapture,
    /// A partial or final transcript arrived
    Transcript(TranscriptEvent),
    /// The transcription transport failed mid-session
    TranscriptionError(String),
    /// A typed question, bypassing the listening phase
    TextQuery(String),
    /// A query call completed
    QueryDone {
        sequence: u64,
        result: Result<String>,
    },
    /// A synthesis call completed
    SynthesisDone {
        sequence: u64,
        result: Result<Vec<u8>>,
    },
    /// The playback stream for `sequence` ran to completion
    PlaybackEnded { sequence: u64 },
    /// The user interrupted; stop speaking and rearm
    Interrupt,
    /// The session is over; release everything
    End,
}

/// Commands from the orchestrator to the capture layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    /// Start the frame producer and the transcription stream
    Start,
    /// Stop both
    Stop,
}

/// User-visible updates surfaced by the orchestrator
#[derive(Debug)]
pub enum StatusUpdate {
    /// The pipeline state changed
    State(&'static str),
    /// Provisional transcript text for display
    PartialTranscript(String),
    /// A turn was appended to the conversation log
    Turn(ConversationTurn),
    /// A recoverable error, as a human-readable status
    Error(String),
}

/// The playback seam: replace-on-play, immediate interrupt
///
/// Completion is reported out of band (see [`bridge_playback`]) so a
/// fake sink in tests can script it.
pub trait AudioSink: Send {
    /// Start playing, replacing any active stream
    ///
    /// # Errors
    ///
    /// Returns an error if the audio cannot be decoded or the output
    /// device refuses the stream.
    fn play(&mut self, audio: Vec<u8>, token: u64) -> Result<()>;

    /// Stop playback immediately; no-op when nothing is playing
    fn interrupt(&mut self);
}

impl AudioSink for PlaybackController {
    fn play(&mut self, audio: Vec<u8>, token: u64) -> Result<()> {
        PlaybackController::play(&*self, &audio, token)
    }

    fn interrupt(&mut self) {
        PlaybackController::interrupt(&*self);
    }
}

/// Forward playback completions into the session inbox
pub fn bridge_playback(
    events: mpsc::Sender<SessionEvent>,
    mut playback: mpsc::Receiver<PlaybackEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(PlaybackEvent::Ended { token }) = playback.recv().await {
            if events
                .send(SessionEvent::PlaybackEnded { sequence: token })
                .await
                .is_err()
            {
                break;
            }
        }
    })
}

/// The conversation state machine
pub struct Orchestrator {
    inbox: mpsc::Receiver<SessionEvent>,
    handle: mpsc::Sender<SessionEvent>,
    session: SessionState,
    query: Arc<dyn QueryBackend>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Box<dyn AudioSink>,
    capture: mpsc::Sender<CaptureCommand>,
    status: mpsc::Sender<StatusUpdate>,
    call_timeout: Duration,
}

impl Orchestrator {
    /// Build an orchestrator and the sender feeding its inbox
    pub fn new(
        query: Arc<dyn QueryBackend>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Box<dyn AudioSink>,
        capture: mpsc::Sender<CaptureCommand>,
        status: mpsc::Sender<StatusUpdate>,
        call_timeout: Duration,
    ) -> (Self, mpsc::Sender<SessionEvent>) {
        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
        let orchestrator = Self {
            inbox: rx,
            handle: tx.clone(),
            session: SessionState::new(),
            query,
            synthesizer,
            sink,
            capture,
            status,
            call_timeout,
        };
        (orchestrator, tx)
    }

    /// Drive the machine until `End` or until every sender is dropped
    ///
    /// Returns the final session state so callers can inspect the
    /// conversation log.
    pub async fn run(mut self) -> SessionState {
        while let Some(event) = self.inbox.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        self.teardown().await;
        self.session
    }

    async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::PermissionGranted => {
                if self.session.state == PipelineState::Idle {
                    self.set_state(PipelineState::Armed).await;
                }
            }
            SessionEvent::StartCapture => {
                if self.session.state == PipelineState::Armed {
                    let _ = self.capture.send(CaptureCommand::Start).await;
                    self.set_state(PipelineState::Listening).await;
                } else {
                    tracing::debug!(state = self.session.state.label(), "ignoring capture request");
                }
            }
            SessionEvent::Transcript(transcript) => self.on_transcript(transcript).await,
            SessionEvent::TranscriptionError(reason) => {
                if self.session.state == PipelineState::Listening {
                    let _ = self.capture.send(CaptureCommand::Stop).await;
                }
                self.report_error(format!("transcription failed: {reason}")).await;
                if self.session.state != PipelineState::Idle {
                    self.set_state(PipelineState::Armed).await;
                }
            }
            SessionEvent::TextQuery(text) => self.on_text_query(text).await,
            SessionEvent::QueryDone { sequence, result } => {
                self.on_query_done(sequence, result).await;
            }
            SessionEvent::SynthesisDone { sequence, result } => {
                self.on_synthesis_done(sequence, result).await;
            }
            SessionEvent::PlaybackEnded { sequence } => {
                if self.session.state == (PipelineState::Speaking { sequence }) {
                    self.set_state(PipelineState::Armed).await;
                } else {
                    tracing::debug!(sequence, "ignoring stale playback completion");
                }
            }
            SessionEvent::Interrupt => self.on_interrupt().await,
            SessionEvent::End => return false,
        }
        true
    }

    async fn on_transcript(&mut self, transcript: TranscriptEvent) {
        if self.session.state != PipelineState::Listening {
            tracing::debug!(
                sequence = transcript.sequence,
                state = self.session.state.label(),
                "dropping transcript outside listening"
            );
            return;
        }

        if !transcript.is_final {
            let _ = self
                .status
                .send(StatusUpdate::PartialTranscript(transcript.text))
                .await;
            return;
        }

        // The utterance is closed either way; capture stops first
        let _ = self.capture.send(CaptureCommand::Stop).await;
        self.session.observe_sequence(transcript.sequence);

        let question = transcript.text.trim().to_string();
        if question.is_empty() {
            tracing::debug!(sequence = transcript.sequence, "empty final transcript, rearming");
            self.set_state(PipelineState::Armed).await;
            return;
        }

        self.push_turn(ConversationTurn::user(question.clone())).await;
        self.dispatch_query(question, transcript.sequence).await;
    }

    async fn on_text_query(&mut self, text: String) {
        if !matches!(
            self.session.state,
            PipelineState::Idle | PipelineState::Armed
        ) {
            tracing::debug!(state = self.session.state.label(), "busy, ignoring text query");
            return;
        }

        let question = text.trim().to_string();
        if question.is_empty() {
            return;
        }

        let sequence = self.session.reserve_sequence();
        self.push_turn(ConversationTurn::user(question.clone())).await;
        self.dispatch_query(question, sequence).await;
    }

    async fn dispatch_query(&mut self, question: String, sequence: u64) {
        let backend = Arc::clone(&self.query);
        let events = self.handle.clone();
        let timeout = self.call_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, backend.ask(&question)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout("query backend".to_string())),
            };
            let _ = events.send(SessionEvent::QueryDone { sequence, result }).await;
        });
        self.set_state(PipelineState::AwaitingQuery { sequence }).await;
    }

    async fn on_query_done(&mut self, sequence: u64, result: Result<String>) {
        if self.session.state != (PipelineState::AwaitingQuery { sequence }) {
            tracing::debug!(sequence, "discarding stale query result");
            return;
        }

        match result {
            Ok(answer) => {
                self.push_turn(ConversationTurn::assistant(answer.clone())).await;
                self.dispatch_synthesis(answer, sequence).await;
            }
            Err(e) => {
                self.report_error(e.to_string()).await;
                self.set_state(PipelineState::Armed).await;
            }
        }
    }

    async fn dispatch_synthesis(&mut self, answer: String, sequence: u64) {
        let synthesizer = Arc::clone(&self.synthesizer);
        let events = self.handle.clone();
        let timeout = self.call_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, synthesizer.synthesize(&answer)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout("synthesis backend".to_string())),
            };
            let _ = events
                .send(SessionEvent::SynthesisDone { sequence, result })
                .await;
        });
        self.set_state(PipelineState::Speaking { sequence }).await;
    }

    async fn on_synthesis_done(&mut self, sequence: u64, result: Result<Vec<u8>>) {
        if self.session.state != (PipelineState::Speaking { sequence }) {
            tracing::debug!(sequence, "discarding stale synthesis result");
            return;
        }

        match result {
            Ok(audio) => {
                if let Err(e) = self.sink.play(audio, sequence) {
                    self.report_error(e.to_string()).await;
                    self.set_state(PipelineState::Armed).await;
                }
                // Remain Speaking until the playback completion arrives
            }
            Err(e) => {
                self.report_error(e.to_string()).await;
                self.set_state(PipelineState::Armed).await;
            }
        }
    }

    async fn on_interrupt(&mut self) {
        match self.session.state {
            // No device acquired; nothing to stop, nothing to rearm
            PipelineState::Idle => {}
            PipelineState::Armed => self.sink.interrupt(),
            PipelineState::Listening => {
                let _ = self.capture.send(CaptureCommand::Stop).await;
                self.sink.interrupt();
                self.set_state(PipelineState::Armed).await;
            }
            PipelineState::AwaitingQuery { .. } | PipelineState::Speaking { .. } => {
                // In-flight results now fail the sequence check on arrival
                self.sink.interrupt();
                self.set_state(PipelineState::Armed).await;
            }
        }
    }

    async fn set_state(&mut self, next: PipelineState) {
        if self.session.state == next {
            return;
        }
        tracing::debug!(
            from = self.session.state.label(),
            to = next.label(),
            "state transition"
        );
        self.session.state = next;
        let _ = self.status.send(StatusUpdate::State(next.label())).await;
    }

    async fn push_turn(&mut self, turn: ConversationTurn) {
        self.session.push_turn(turn.clone());
        let _ = self.status.send(StatusUpdate::Turn(turn)).await;
    }

    async fn report_error(&mut self, message: String) {
        tracing::warn!(error = %message, "session error");
        let _ = self.status.send(StatusUpdate::Error(message)).await;
    }

    /// Release capture, playback, and transport on every terminal path
    async fn teardown(&mut self) {
        let _ = self.capture.send(CaptureCommand::Stop).await;
        self.sink.interrupt();
        self.set_state(PipelineState::Idle).await;
        tracing::info!(turns = self.session.turns().len(), "session ended");
    }
}
