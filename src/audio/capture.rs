//! Audio capture from microphone
//!
//! Produces fixed-size mono frames from the default input device. The
//! device callback never blocks: frames are handed off through a bounded
//! channel and dropped (counted) when the consumer falls behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Frames queued between the device callback and the consumer
const FRAME_QUEUE: usize = 16;

/// One fixed-size chunk of captured audio
///
/// Immutable once produced; samples are mono f32 at `sample_rate`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Captures audio from the default input device in fixed-size frames
pub struct FrameProducer {
    device: Device,
    config: StreamConfig,
    frame_len: usize,
    stream: Option<Stream>,
    dropped: Arc<AtomicU64>,
}

impl FrameProducer {
    /// Acquire the default input device
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if no input device is available or
    /// its configuration cannot be read.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Permission("no input device available".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| Error::Permission(e.to_string()))?;

        if supported.sample_format() != SampleFormat::F32 {
            return Err(Error::Audio(format!(
                "unsupported sample format: {:?}",
                supported.sample_format()
            )));
        }

        let config = supported.config();
        // 250 ms of mono audio per frame
        let frame_len = config.sample_rate.0 as usize / 4;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            frame_len,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            frame_len,
            stream: None,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Device sample rate frames are produced at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Start capturing, returning the frame stream
    ///
    /// Any previous stream is torn down first; at most one capture
    /// stream exists per producer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the input stream cannot be built.
    pub fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        self.stop();

        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let channels = self.config.channels as usize;
        let sample_rate = self.config.sample_rate.0;
        let frame_len = self.frame_len;
        let dropped = Arc::clone(&self.dropped);
        let mut pending: Vec<f32> = Vec::with_capacity(frame_len * 2);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels <= 1 {
                        pending.extend_from_slice(data);
                    } else {
                        // Fold interleaved channels to mono
                        #[allow(clippy::cast_precision_loss)]
                        pending.extend(
                            data.chunks(channels)
                                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                        );
                    }

                    while pending.len() >= frame_len {
                        let samples: Vec<f32> = pending.drain(..frame_len).collect();
                        let frame = AudioFrame {
                            samples,
                            sample_rate,
                            channels: 1,
                        };
                        if tx.try_send(frame).is_err() {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(rx)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!(
                dropped = self.dropped.load(Ordering::Relaxed),
                "audio capture stopped"
            );
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Frames dropped because the consumer fell behind
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
