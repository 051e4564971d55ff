use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voxbridge::Config;
use voxbridge::audio::{
    AudioFrame, DecodedAudio, FrameProducer, PlaybackController, PlaybackEvent, pcm,
};
use voxbridge::backend::{HttpQueryBackend, HttpSynthesizer};
use voxbridge::relay::{ProviderConfig, RelayState};
use voxbridge::session::{
    AudioSink, CaptureCommand, Orchestrator, Role, SessionEvent, StatusUpdate, bridge_playback,
};
use voxbridge::stt::{SttEvent, TranscriptionClient};

/// voxbridge - real-time voice conversations over a streaming STT relay
#[derive(Parser)]
#[command(name = "voxbridge", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server bridging clients to the STT provider
    Serve {
        /// Port to listen on
        #[arg(long, env = "VOXBRIDGE_PORT", default_value = "8901")]
        port: u16,
    },
    /// Hold a voice conversation through a relay
    Talk {
        /// Relay WebSocket endpoint (overrides the environment)
        #[arg(long)]
        relay_url: Option<String>,
    },
    /// Ask a single typed question, no microphone involved
    Ask {
        /// The question text
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Output WAV path
        #[arg(short, long, default_value = "mic-check.wav")]
        output: std::path::PathBuf,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voxbridge=info",
        1 => "info,voxbridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve { port } => serve(port).await,
        Command::Talk { relay_url } => talk(relay_url).await,
        Command::Ask { text } => ask(text).await,
        Command::TestMic { duration, output } => test_mic(duration, &output).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let config = Config::from_env();
    let state = Arc::new(RelayState {
        provider: ProviderConfig::from_config(&config),
    });

    tracing::info!(port, provider = %state.provider.url, "starting relay");
    voxbridge::relay::serve(([0, 0, 0, 0], port).into(), state).await?;
    Ok(())
}

/// Fallback sink for sessions without an output device: completes each
/// play immediately so the state machine still cycles.
struct SilentSink {
    events: mpsc::Sender<PlaybackEvent>,
}

impl AudioSink for SilentSink {
    fn play(&mut self, _audio: Vec<u8>, token: u64) -> voxbridge::Result<()> {
        let _ = self.events.try_send(PlaybackEvent::Ended { token });
        Ok(())
    }

    fn interrupt(&mut self) {}
}

async fn ask(text: String) -> anyhow::Result<()> {
    let config = Config::from_env();

    let (status_tx, mut status_rx) = mpsc::channel(64);
    let (capture_tx, _capture_rx) = mpsc::channel(8);
    let (playback_tx, playback_rx) = mpsc::channel(8);

    let sink: Box<dyn AudioSink> = match PlaybackController::spawn(playback_tx.clone()) {
        Ok(playback) => Box::new(playback),
        Err(e) => {
            tracing::warn!(error = %e, "no output device, answer will only be printed");
            Box::new(SilentSink { events: playback_tx })
        }
    };

    let (orchestrator, events) = Orchestrator::new(
        Arc::new(HttpQueryBackend::new(config.query_url.clone())),
        Arc::new(HttpSynthesizer::new(
            config.synth_url.clone(),
            config.synth_key.clone(),
        )),
        sink,
        capture_tx,
        status_tx,
        config.call_timeout,
    );
    let bridge = bridge_playback(events.clone(), playback_rx);
    let run = tokio::spawn(orchestrator.run());

    events.send(SessionEvent::TextQuery(text)).await?;

    let mut started = false;
    while let Some(update) = status_rx.recv().await {
        match update {
            StatusUpdate::Turn(turn) => print_turn(&turn.role, &turn.text),
            StatusUpdate::Error(e) => {
                eprintln!("error: {e}");
                break;
            }
            StatusUpdate::State(state) => {
                if state == "armed" && started {
                    break;
                }
                started = true;
            }
            StatusUpdate::PartialTranscript(_) => {}
        }
    }

    events.send(SessionEvent::End).await.ok();
    run.await?;
    bridge.abort();
    Ok(())
}

#[allow(clippy::future_not_send)]
async fn talk(relay_override: Option<String>) -> anyhow::Result<()> {
    let mut config = Config::from_env();
    if let Some(url) = relay_override {
        config.relay_url = url;
    }

    // Acquiring the input device is the permission step
    let mut producer = FrameProducer::open()?;

    let (status_tx, status_rx) = mpsc::channel(64);
    let (capture_tx, capture_rx) = mpsc::channel(8);
    let (playback_tx, playback_rx) = mpsc::channel(8);
    let playback = PlaybackController::spawn(playback_tx)?;

    let (orchestrator, events) = Orchestrator::new(
        Arc::new(HttpQueryBackend::new(config.query_url.clone())),
        Arc::new(HttpSynthesizer::new(
            config.synth_url.clone(),
            config.synth_key.clone(),
        )),
        Box::new(playback),
        capture_tx,
        status_tx,
        config.call_timeout,
    );
    let bridge = bridge_playback(events.clone(), playback_rx);
    let run = tokio::spawn(orchestrator.run());
    let printer = spawn_status_printer(status_rx);

    events.send(SessionEvent::PermissionGranted).await?;

    println!("enter = start listening, i = interrupt, q = quit; anything else is a typed question");
    pipeline_loop(&mut producer, capture_rx, &events, &config).await;

    events.send(SessionEvent::End).await.ok();
    let session = run.await?;
    bridge.abort();
    printer.abort();

    tracing::info!(
        turns = session.turns().len(),
        dropped = producer.dropped(),
        "conversation finished"
    );
    Ok(())
}

enum LineAction {
    Continue,
    Quit,
}

async fn handle_line(line: &str, events: &mpsc::Sender<SessionEvent>) -> LineAction {
    let line = line.trim();
    if line == "q" {
        return LineAction::Quit;
    }
    let event = if line.is_empty() {
        SessionEvent::StartCapture
    } else if line == "i" {
        SessionEvent::Interrupt
    } else {
        SessionEvent::TextQuery(line.to_string())
    };
    let _ = events.send(event).await;
    LineAction::Continue
}

async fn forward_stt_event(event: SttEvent, events: &mpsc::Sender<SessionEvent>) {
    match event {
        SttEvent::Ready => tracing::debug!("transcription stream ready"),
        SttEvent::Transcript(t) => {
            let _ = events.send(SessionEvent::Transcript(t)).await;
        }
        SttEvent::Error(e) => {
            let _ = events.send(SessionEvent::TranscriptionError(e)).await;
        }
        SttEvent::Closed => tracing::debug!("transcription stream closed"),
    }
}

/// Drive capture, encoding, and the transcription transport
///
/// Runs on the main task because the capture stream is not `Send`. The
/// orchestrator steers it through `CaptureCommand`s; frames flow device
/// → resampler → transcription client without ever blocking the device
/// callback.
#[allow(clippy::future_not_send)]
async fn pipeline_loop(
    producer: &mut FrameProducer,
    mut capture_rx: mpsc::Receiver<CaptureCommand>,
    events: &mpsc::Sender<SessionEvent>,
    config: &Config,
) {
    let mut stt = TranscriptionClient::new();
    let (stt_tx, mut stt_rx) = mpsc::channel::<SttEvent>(64);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            cmd = capture_rx.recv() => match cmd {
                Some(CaptureCommand::Start) => {
                    match start_capture(producer, &mut stt, &stt_tx, config).await {
                        Ok(frames) => {
                            if !capture_loop(producer, frames, &mut stt, &mut capture_rx, &mut stt_rx, &mut lines, events, config).await {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = events.send(SessionEvent::TranscriptionError(e.to_string())).await;
                        }
                    }
                }
                Some(CaptureCommand::Stop) | None => {
                    if cmd.is_none() {
                        break;
                    }
                }
            },
            event = stt_rx.recv() => {
                if let Some(event) = event {
                    forward_stt_event(event, events).await;
                }
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if matches!(handle_line(&line, events).await, LineAction::Quit) {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            },
        }
    }

    producer.stop();
    stt.stop().await;
}

#[allow(clippy::future_not_send)]
async fn start_capture(
    producer: &mut FrameProducer,
    stt: &mut TranscriptionClient,
    stt_tx: &mpsc::Sender<SttEvent>,
    config: &Config,
) -> voxbridge::Result<mpsc::Receiver<AudioFrame>> {
    stt.start(
        &config.relay_url,
        &config.language,
        &config.format,
        stt_tx.clone(),
    )
    .await?;
    producer.start()
}

/// Inner loop while capture is live; returns false when the user quit
#[allow(clippy::future_not_send, clippy::too_many_arguments)]
async fn capture_loop(
    producer: &mut FrameProducer,
    mut frames: mpsc::Receiver<AudioFrame>,
    stt: &mut TranscriptionClient,
    capture_rx: &mut mpsc::Receiver<CaptureCommand>,
    stt_rx: &mut mpsc::Receiver<SttEvent>,
    lines: &mut Lines<BufReader<Stdin>>,
    events: &mpsc::Sender<SessionEvent>,
    config: &Config,
) -> bool {
    let keep_going = loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let pcm = pcm::encode_frame(&frame.samples, frame.sample_rate, config.target_rate);
                    stt.send_frame(pcm);
                }
                None => break true,
            },
            cmd = capture_rx.recv() => match cmd {
                Some(CaptureCommand::Stop) => break true,
                Some(CaptureCommand::Start) => {}
                None => break false,
            },
            event = stt_rx.recv() => {
                if let Some(event) = event {
                    forward_stt_event(event, events).await;
                }
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if matches!(handle_line(&line, events).await, LineAction::Quit) {
                        break false;
                    }
                }
                Ok(None) | Err(_) => break false,
            },
        }
    };

    producer.stop();
    stt.stop().await;
    keep_going
}

fn spawn_status_printer(mut status_rx: mpsc::Receiver<StatusUpdate>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = status_rx.recv().await {
            match update {
                StatusUpdate::State(state) => tracing::info!(state, "pipeline"),
                StatusUpdate::PartialTranscript(text) => {
                    tracing::info!(text = %text, "hearing");
                }
                StatusUpdate::Turn(turn) => print_turn(&turn.role, &turn.text),
                StatusUpdate::Error(e) => eprintln!("error: {e}"),
            }
        }
    })
}

fn print_turn(role: &Role, text: &str) {
    let who = match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("{who}: {text}");
}

#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: &std::path::Path) -> anyhow::Result<()> {
    let mut producer = FrameProducer::open()?;
    let sample_rate = producer.sample_rate();
    let mut frames = producer.start()?;

    println!("recording {duration}s from the default input device...");
    let mut samples: Vec<f32> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.recv()).await {
        samples.extend_from_slice(&frame.samples);
    }
    producer.stop();

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;
    for sample in pcm::resample_to_i16(&samples, sample_rate, sample_rate) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    println!("wrote {} samples to {}", samples.len(), output.display());
    Ok(())
}

async fn test_speaker() -> anyhow::Result<()> {
    let (playback_tx, mut playback_rx) = mpsc::channel(8);
    let playback = PlaybackController::spawn(playback_tx)?;

    let sample_rate = 24_000u32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.2 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();

    println!("playing a one-second test tone...");
    playback.play_decoded(
        DecodedAudio {
            samples,
            sample_rate,
        },
        0,
    )?;

    match tokio::time::timeout(Duration::from_secs(5), playback_rx.recv()).await {
        Ok(Some(PlaybackEvent::Ended { .. })) => println!("done"),
        _ => println!("playback did not complete"),
    }
    Ok(())
}
