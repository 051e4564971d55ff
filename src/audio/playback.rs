//! Audio playback to speakers
//!
//! Owns the single active synthesized-speech output. `play` replaces any
//! stream already running, `interrupt` stops playback immediately, and a
//! completion event fires exactly once per play that runs to the end.
//!
//! The cpal output stream lives on a dedicated worker thread so the
//! controller itself stays `Send` and usable from async tasks.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use super::pcm;
use crate::{Error, Result};

/// Playback lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The stream for `token` played to completion (not interrupted)
    Ended { token: u64 },
}

/// Decoded audio ready for the output device
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

enum Command {
    Play { audio: DecodedAudio, token: u64 },
    Interrupt,
    Shutdown,
}

/// Manages the single active playback stream
pub struct PlaybackController {
    commands: std_mpsc::Sender<Command>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl PlaybackController {
    /// Spawn the playback worker
    ///
    /// Completion events are delivered on `events`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if no output device is available.
    pub fn spawn(events: mpsc::Sender<PlaybackEvent>) -> Result<Self> {
        // Probe the device up front so a missing output surfaces here,
        // not on the first play.
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let (tx, rx) = std_mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("voxbridge-playback".to_string())
            .spawn(move || worker_loop(&rx, &events))
            .map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            commands: tx,
            worker: Some(worker),
        })
    }

    /// Decode and play synthesized audio, replacing any active stream
    ///
    /// Accepts MPEG audio or WAV; the container is detected from the
    /// payload header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the payload is not decodable.
    pub fn play(&self, audio: &[u8], token: u64) -> Result<()> {
        let decoded = decode(audio)?;
        self.play_decoded(decoded, token)
    }

    /// Play already-decoded samples, replacing any active stream
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the worker has shut down.
    pub fn play_decoded(&self, audio: DecodedAudio, token: u64) -> Result<()> {
        self.commands
            .send(Command::Play { audio, token })
            .map_err(|_| Error::Audio("playback worker gone".to_string()))
    }

    /// Stop playback immediately; no-op when nothing is playing
    pub fn interrupt(&self) {
        let _ = self.commands.send(Command::Interrupt);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct ActiveStream {
    // Held for its side effect: dropping stops the device stream
    _stream: cpal::Stream,
    finished: Arc<AtomicBool>,
    deadline: Instant,
    token: u64,
}

fn worker_loop(commands: &std_mpsc::Receiver<Command>, events: &mpsc::Sender<PlaybackEvent>) {
    let mut active: Option<ActiveStream> = None;

    loop {
        match commands.recv_timeout(Duration::from_millis(50)) {
            Ok(Command::Play { audio, token }) => {
                // Replace: the previous stream stops before the new one starts
                active = None;
                match start_stream(audio, token) {
                    Ok(stream) => active = Some(stream),
                    Err(e) => tracing::error!(error = %e, token, "playback failed to start"),
                }
            }
            Ok(Command::Interrupt) => {
                if active.take().is_some() {
                    tracing::debug!("playback interrupted");
                }
            }
            Ok(Command::Shutdown) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
        }

        let done = active
            .as_ref()
            .is_some_and(|a| a.finished.load(Ordering::Relaxed) || Instant::now() >= a.deadline);
        if done {
            if let Some(a) = active.take() {
                let _ = events.blocking_send(PlaybackEvent::Ended { token: a.token });
                tracing::debug!(token = a.token, "playback complete");
            }
        }
    }
}

fn start_stream(audio: DecodedAudio, token: u64) -> Result<ActiveStream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    let device_rate = supported.sample_rate().0;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let samples = pcm::resample_f32(&audio.samples, audio.sample_rate, device_rate);
    let total = samples.len();
    let channels = config.channels as usize;
    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);
    let mut pos = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = if pos < total {
                        let s = samples[pos];
                        pos += 1;
                        s
                    } else {
                        finished_cb.store(true, Ordering::Relaxed);
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (total as u64 * 1000) / u64::from(device_rate.max(1));
    tracing::debug!(token, samples = total, duration_ms, "playback started");

    Ok(ActiveStream {
        _stream: stream,
        finished,
        deadline: Instant::now() + Duration::from_millis(duration_ms + 500),
        token,
    })
}

/// Decode synthesized audio bytes, detecting the container from the header
///
/// # Errors
///
/// Returns `Error::Decode` for payloads that are neither MPEG audio nor WAV.
pub fn decode(audio: &[u8]) -> Result<DecodedAudio> {
    if audio.len() < 4 {
        return Err(Error::Decode("audio payload too short".to_string()));
    }
    if audio.starts_with(b"RIFF") {
        return decode_wav(audio);
    }
    decode_mp3(audio)
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    sample_rate = frame.sample_rate.max(0) as u32;
                }
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32_768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32_768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32_768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Decode("no MPEG audio frames in payload".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Decode WAV bytes to mono f32 samples
fn decode_wav(wav_data: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32_768.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?,
    };

    let channels = spec.channels as usize;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = if channels > 1 {
        raw.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        raw
    };

    if samples.is_empty() {
        return Err(Error::Decode("empty WAV payload".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_mono_wav() {
        let bytes = wav_bytes(&[0, 16_384, -16_384, 32_767], 16_000, 1);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), 4);
        assert!((decoded.samples[1] - 0.5).abs() < 0.01);
    }

    #[test]
    fn folds_stereo_wav_to_mono() {
        let bytes = wav_bytes(&[16_384, -16_384, 8_192, 8_192], 24_000, 2);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.samples.len(), 2);
        assert!(decoded.samples[0].abs() < 0.01);
        assert!((decoded.samples[1] - 0.25).abs() < 0.01);
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(matches!(decode(&[1, 2, 3]), Err(Error::Decode(_))));
        assert!(matches!(decode(&[0u8; 64]), Err(Error::Decode(_))));
    }
}
