//! Speaker output.
//!
//! The speaker is owned by exactly one [`AudioSink`], driven by the playback
//! queue. A sink plays one segment at a time and reports completion through
//! the [`SegmentHandle`] it was given; `halt` silences it immediately.

use crate::audio::resample_linear;
use crate::audio::wav;
use crate::config::AudioConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::PlaybackSegment;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Completion report from a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// The segment played to the end.
    Finished {
        /// Id the queue assigned when starting the segment.
        playback_id: u64,
    },
    /// The segment could not be played.
    Failed {
        /// Id the queue assigned when starting the segment.
        playback_id: u64,
        /// Failure detail.
        message: String,
    },
}

/// Completion callback for one started segment.
///
/// Reporting after the queue has moved on is harmless: stale playback ids
/// are ignored.
#[derive(Debug, Clone)]
pub struct SegmentHandle {
    playback_id: u64,
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl SegmentHandle {
    /// Create a handle reporting to `tx`.
    pub fn new(playback_id: u64, tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { playback_id, tx }
    }

    /// Id of the segment this handle reports for.
    pub fn playback_id(&self) -> u64 {
        self.playback_id
    }

    /// Report that the segment played to the end.
    pub fn finished(&self) {
        let _ = self.tx.send(SinkEvent::Finished {
            playback_id: self.playback_id,
        });
    }

    /// Report that the segment could not be played.
    pub fn failed(&self, message: impl Into<String>) {
        let _ = self.tx.send(SinkEvent::Failed {
            playback_id: self.playback_id,
            message: message.into(),
        });
    }
}

/// Exclusive owner of the output device.
pub trait AudioSink: Send {
    /// Begin playing `segment` (its leading pause, then its audio).
    ///
    /// Returns immediately; completion arrives through `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be started at all.
    fn start(&mut self, segment: &PlaybackSegment, handle: SegmentHandle) -> Result<()>;

    /// Stop the sounding segment now. Its handle is never signalled.
    fn halt(&mut self);
}

enum SinkCommand {
    Play {
        samples: Vec<f32>,
        handle: SegmentHandle,
    },
    Halt,
    Shutdown,
}

/// Audio playback to system speakers via cpal.
///
/// The output stream runs on a dedicated thread fed through a crossbeam
/// command channel, so `start` and `halt` never block the caller.
pub struct CpalSink {
    cmd_tx: Sender<SinkCommand>,
    output_rate: u32,
}

impl CpalSink {
    /// Open the output device and start the playback thread.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available or the stream
    /// cannot be started.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<SinkCommand>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let config = config.clone();
        let output_rate = config.output_sample_rate;

        std::thread::Builder::new()
            .name("parley-playback".to_owned())
            .spawn(move || playback_thread(&config, &cmd_rx, &ready_tx))
            .map_err(|e| SpeechError::Audio(format!("cannot spawn playback thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| SpeechError::Audio("playback thread exited early".into()))??;

        Ok(Self {
            cmd_tx,
            output_rate,
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
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

impl AudioSink for CpalSink {
    fn start(&mut self, segment: &PlaybackSegment, handle: SegmentHandle) -> Result<()> {
        let samples = render_segment(segment, self.output_rate)?;
        self.cmd_tx
            .send(SinkCommand::Play { samples, handle })
            .map_err(|_| SpeechError::Channel("playback thread is gone".into()))
    }

    fn halt(&mut self) {
        let _ = self.cmd_tx.send(SinkCommand::Halt);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SinkCommand::Shutdown);
    }
}

/// Decode a segment to mono samples at `output_rate`, leading pause included.
pub(crate) fn render_segment(segment: &PlaybackSegment, output_rate: u32) -> Result<Vec<f32>> {
    let silence = (segment.pause_before_ms * u64::from(output_rate) / 1000) as usize;
    let mut samples = vec![0.0; silence];
    if !segment.audio.is_empty() {
        let decoded = wav::decode(&segment.audio)?;
        samples.extend(resample_linear(
            &decoded.samples,
            decoded.sample_rate,
            output_rate,
        ));
    }
    Ok(samples)
}

/// Shared state between the playback thread and the device callback.
#[derive(Default)]
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
}

impl PlaybackBuffer {
    fn drained(&self) -> bool {
        self.position >= self.samples.len()
    }
}

fn open_output_device(config: &AudioConfig) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(ref name) = config.output_device {
        host.output_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| SpeechError::Audio(format!("output device '{name}' not found")))
    } else {
        host.default_output_device()
            .ok_or_else(|| SpeechError::Audio("no default output device".into()))
    }
}

fn build_output_stream(
    config: &AudioConfig,
    buffer: Arc<Mutex<PlaybackBuffer>>,
) -> Result<cpal::Stream> {
    let device = open_output_device(config)?;
    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: config.output_sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let Ok(mut buf) = buffer.lock() else {
                    data.fill(0.0);
                    return;
                };
                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| SpeechError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| SpeechError::Audio(format!("failed to start output stream: {e}")))?;
    Ok(stream)
}

/// How often the playback thread checks for a drained buffer.
const DRAIN_POLL: Duration = Duration::from_millis(10);

fn playback_thread(
    config: &AudioConfig,
    cmd_rx: &Receiver<SinkCommand>,
    ready_tx: &Sender<Result<()>>,
) {
    let buffer = Arc::new(Mutex::new(PlaybackBuffer::default()));
    let stream = match build_output_stream(config, Arc::clone(&buffer)) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    let mut active: Option<SegmentHandle> = None;
    loop {
        match cmd_rx.recv_timeout(DRAIN_POLL) {
            Ok(SinkCommand::Play { samples, handle }) => {
                let Ok(mut buf) = buffer.lock() else {
                    handle.failed("playback buffer lock poisoned");
                    continue;
                };
                debug!(
                    "playback {}: {} samples",
                    handle.playback_id(),
                    samples.len()
                );
                buf.samples = samples;
                buf.position = 0;
                active = Some(handle);
            }
            Ok(SinkCommand::Halt) => {
                if let Ok(mut buf) = buffer.lock() {
                    buf.samples.clear();
                    buf.position = 0;
                }
                active = None;
            }
            Ok(SinkCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if active.is_some() {
            let drained = match buffer.lock() {
                Ok(buf) => buf.drained(),
                Err(_) => {
                    warn!("playback buffer lock poisoned");
                    true
                }
            };
            if drained && let Some(handle) = active.take() {
                handle.finished();
            }
        }
    }

    drop(stream);
    info!("audio playback stopped");
}
