//! Shared fixtures for session pipeline tests
//!
//! Fakes over the backend/sink seams so scenarios run without audio
//! hardware or a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voxbridge::backend::{QueryBackend, SpeechSynthesizer};
use voxbridge::session::{
    AudioSink, CaptureCommand, Orchestrator, SessionEvent, SessionState, StatusUpdate,
};
use voxbridge::stt::TranscriptEvent;
use voxbridge::{Error, Result};

/// Scripted behavior for a fake downstream backend
#[derive(Clone)]
pub enum Behavior {
    /// Respond successfully after an optional delay
    Respond(Duration),
    /// Fail with a backend error
    Fail,
    /// Never respond; only the orchestrator timeout resolves the call
    Hang,
}

pub struct FakeQuery {
    pub behavior: Behavior,
    pub answer: String,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl QueryBackend for FakeQuery {
    async fn ask(&self, _question: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Respond(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(self.answer.clone())
            }
            Behavior::Fail => Err(Error::Backend("query backend 500: boom".to_string())),
            Behavior::Hang => futures::future::pending().await,
        }
    }
}

pub struct FakeSynth {
    pub behavior: Behavior,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Respond(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(b"synthesized-audio".to_vec())
            }
            Behavior::Fail => Err(Error::Backend("synthesis backend 500: boom".to_string())),
            Behavior::Hang => futures::future::pending().await,
        }
    }
}

/// Records play/interrupt calls; playback completions are scripted by
/// the test sending `PlaybackEnded` itself.
pub struct FakeSink {
    pub played: Arc<Mutex<Vec<u64>>>,
    pub interrupts: Arc<AtomicUsize>,
}

impl AudioSink for FakeSink {
    fn play(&mut self, _audio: Vec<u8>, token: u64) -> Result<()> {
        self.played.lock().unwrap().push(token);
        Ok(())
    }

    fn interrupt(&mut self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}

/// An orchestrator wired to fakes, plus every observable end
pub struct Harness {
    pub events: mpsc::Sender<SessionEvent>,
    pub status: mpsc::Receiver<StatusUpdate>,
    pub capture: mpsc::Receiver<CaptureCommand>,
    pub query_calls: Arc<AtomicUsize>,
    pub synth_calls: Arc<AtomicUsize>,
    pub played: Arc<Mutex<Vec<u64>>>,
    pub interrupts: Arc<AtomicUsize>,
    run: JoinHandle<SessionState>,
}

impl Harness {
    pub fn new(query: Behavior, synth: Behavior) -> Self {
        Self::with_timeout(query, synth, Duration::from_secs(5))
    }

    pub fn with_timeout(query: Behavior, synth: Behavior, call_timeout: Duration) -> Self {
        let query_calls = Arc::new(AtomicUsize::new(0));
        let synth_calls = Arc::new(AtomicUsize::new(0));
        let played = Arc::new(Mutex::new(Vec::new()));
        let interrupts = Arc::new(AtomicUsize::new(0));

        let (status_tx, status_rx) = mpsc::channel(64);
        let (capture_tx, capture_rx) = mpsc::channel(16);

        let (orchestrator, events) = Orchestrator::new(
            Arc::new(FakeQuery {
                behavior: query,
                answer: "Oi!".to_string(),
                calls: Arc::clone(&query_calls),
            }),
            Arc::new(FakeSynth {
                behavior: synth,
                calls: Arc::clone(&synth_calls),
            }),
            Box::new(FakeSink {
                played: Arc::clone(&played),
                interrupts: Arc::clone(&interrupts),
            }),
            capture_tx,
            status_tx,
            call_timeout,
        );

        Self {
            events,
            status: status_rx,
            capture: capture_rx,
            query_calls,
            synth_calls,
            played,
            interrupts,
            run: tokio::spawn(orchestrator.run()),
        }
    }

    /// Send one event into the inbox
    pub async fn send(&self, event: SessionEvent) {
        self.events.send(event).await.expect("inbox closed");
    }

    /// Drain status updates until the given state label appears
    pub async fn wait_state(&mut self, label: &str) {
        let deadline = Duration::from_secs(2);
        loop {
            match tokio::time::timeout(deadline, self.status.recv()).await {
                Ok(Some(StatusUpdate::State(state))) if state == label => return,
                Ok(Some(_)) => {}
                Ok(None) => panic!("status channel closed waiting for {label}"),
                Err(_) => panic!("timed out waiting for state {label}"),
            }
        }
    }

    /// Drain status updates until an error status appears, returning it
    pub async fn wait_error(&mut self) -> String {
        let deadline = Duration::from_secs(2);
        loop {
            match tokio::time::timeout(deadline, self.status.recv()).await {
                Ok(Some(StatusUpdate::Error(message))) => return message,
                Ok(Some(_)) => {}
                Ok(None) => panic!("status channel closed waiting for error"),
                Err(_) => panic!("timed out waiting for error status"),
            }
        }
    }

    /// Expect the next capture command
    pub async fn expect_capture(&mut self, expected: CaptureCommand) {
        let cmd = tokio::time::timeout(Duration::from_secs(2), self.capture.recv())
            .await
            .expect("timed out waiting for capture command")
            .expect("capture channel closed");
        assert_eq!(cmd, expected);
    }

    /// End the session and return the final state
    pub async fn finish(self) -> SessionState {
        let _ = self.events.send(SessionEvent::End).await;
        self.run.await.expect("orchestrator panicked")
    }
}

/// Build a transcript event
pub fn transcript(text: &str, is_final: bool, sequence: u64) -> SessionEvent {
    SessionEvent::Transcript(TranscriptEvent {
        text: text.to_string(),
        is_final,
        sequence,
    })
}

/// Walk a fresh harness into the `Listening` state
pub async fn arm_and_listen(harness: &mut Harness) {
    harness.send(SessionEvent::PermissionGranted).await;
    harness.wait_state("armed").await;
    harness.send(SessionEvent::StartCapture).await;
    harness.expect_capture(CaptureCommand::Start).await;
    harness.wait_state("listening").await;
}
