//! Microphone capture.
//!
//! A [`FrameSource`] produces fixed-size [`AudioFrame`]s with monotonic
//! sequence numbers. [`CpalCapture`] reads the system microphone at its
//! native rate and re-chunks to the configured frame size; [`ChannelFrameSource`]
//! forwards frames pushed by the embedding application.

use crate::audio::{StreamResampler, to_mono};
use crate::config::AudioConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::AudioFrame;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Producer of captured audio frames.
///
/// `run` sends frames until `cancel` fires or the source is exhausted. It
/// must never block on the receiver: a full channel drops frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Capture until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::PermissionDenied`] when the microphone cannot
    /// be opened at all; other device failures map to [`SpeechError::Audio`].
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<AudioFrame>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Re-chunks arbitrary-length sample blocks into fixed-size frames.
pub(crate) struct FrameAssembler {
    frame_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_seq: u64,
}

impl FrameAssembler {
    pub(crate) fn new(frame_samples: usize, sample_rate: u32) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_samples * 2),
            next_seq: 0,
        }
    }

    /// Append samples and drain every complete frame.
    pub(crate) fn push(&mut self, samples: &[f32], now: Instant) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let samples = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame {
                samples,
                sample_rate: self.sample_rate,
                seq: self.next_seq,
                captured_at: now,
            });
            self.next_seq += 1;
        }
        frames
    }
}

/// Audio capture from the system microphone via cpal.
///
/// The cpal stream lives on its own thread for the lifetime of `run`; the
/// device callback only converts, re-chunks and `try_send`s.
pub struct CpalCapture {
    config: AudioConfig,
}

impl CpalCapture {
    /// Create a capture source. The device is opened when `run` starts.
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl FrameSource for CpalCapture {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<AudioFrame>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let config = self.config;

        let thread = std::thread::Builder::new()
            .name("parley-capture".to_owned())
            .spawn(move || capture_thread(&config, tx, ready_tx, &stop_rx))
            .map_err(|e| SpeechError::Audio(format!("cannot spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => return Err(SpeechError::Audio("capture thread exited early".into())),
        }

        cancel.cancelled().await;
        let _ = stop_tx.send(());
        let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        info!("audio capture stopped");
        Ok(())
    }
}

fn open_input_device(config: &AudioConfig) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(ref name) = config.input_device {
        host.input_devices()
            .map_err(|e| SpeechError::PermissionDenied(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| SpeechError::PermissionDenied(format!("input device '{name}' not found")))
    } else {
        host.default_input_device()
            .ok_or_else(|| SpeechError::PermissionDenied("no default input device".into()))
    }
}

fn capture_thread(
    config: &AudioConfig,
    tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: &crossbeam_channel::Receiver<()>,
) {
    let stream = match build_input_stream(config, tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    // Hold the stream alive until asked to stop.
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_input_stream(config: &AudioConfig, tx: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream> {
    let device = open_input_device(config)?;
    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    let default_config = device
        .default_input_config()
        .map_err(|e| SpeechError::PermissionDenied(format!("no default input config: {e}")))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    info!("native input config: {native_rate}Hz, {native_channels} channels");

    let target_rate = config.input_sample_rate;
    let mut assembler = FrameAssembler::new(config.frame_samples(), target_rate);
    let mut resampler = StreamResampler::new(native_rate, target_rate);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, native_channels);
                let samples = resampler.process(&mono);
                for frame in assembler.push(&samples, Instant::now()) {
                    // Never block the audio thread.
                    if tx.try_send(frame).is_err() {
                        debug!("audio channel full, dropping frame");
                    }
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                SpeechError::PermissionDenied("input device not available".into())
            }
            other => SpeechError::Audio(format!("failed to build input stream: {other}")),
        })?;

    stream
        .play()
        .map_err(|e| SpeechError::Audio(format!("failed to start input stream: {e}")))?;

    info!("audio capture started: native {native_rate}Hz -> target {target_rate}Hz");
    Ok(stream)
}

/// Frame source fed through a channel by the embedding application.
pub struct ChannelFrameSource {
    rx: mpsc::Receiver<AudioFrame>,
}

impl ChannelFrameSource {
    /// Create a source and the sender that feeds it.
    pub fn new(buffer: usize) -> (mpsc::Sender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn run(
        mut self: Box<Self>,
        tx: mpsc::Sender<AudioFrame>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                frame = self.rx.recv() => {
                    let Some(frame) = frame else { break };
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
