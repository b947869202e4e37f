//! Shared helpers for integration tests: scripted services, a recording
//! speaker and a frame feeder with a fast-forward clock.

use async_trait::async_trait;
use bytes::Bytes;
use parley::audio::capture::ChannelFrameSource;
use parley::audio::playback::{AudioSink, SegmentHandle};
use parley::llm::{ReplyClient, ReplyResult};
use parley::stt::{TranscriptionClient, TranscriptionResult};
use parley::tts::{SynthesisClient, SynthesisResult};
use parley::{
    AudioFrame, FlushHandle, PlaybackSegment, RuntimeEvent, SessionAudioState, SessionController,
    SessionServices, SpeechConfig, SpeechError, Stage, TurnController, TurnId,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) const RATE: u32 = 16_000;
pub(crate) const FRAME_MS: u64 = 20;
const FRAME_SAMPLES: usize = (RATE as usize * FRAME_MS as usize) / 1000;

/// Normal speaking level: above `volume_threshold`, below the override.
pub(crate) const SPEECH: f32 = 0.1;
/// Loud enough to pierce a suppression window.
pub(crate) const LOUD: f32 = 0.3;

const WAIT: Duration = Duration::from_secs(5);

/// Config tuned for tests: short gaps and budgets.
pub(crate) fn test_config() -> SpeechConfig {
    let mut config = SpeechConfig::default();
    config.segmenter.speech_max_gap_ms = 300;
    config.segmenter.speech_min_duration_ms = 800;
    config.segmenter.pre_roll_ms = 100;
    config.services.transcription_timeout_ms = 1_000;
    config.services.reply_timeout_ms = 1_000;
    config.services.synthesis_timeout_ms = 1_000;
    config
}

/// PCM16 WAV of `ms` milliseconds of a quiet tone.
pub(crate) fn wav_of(ms: u64) -> Vec<u8> {
    let rate = 24_000u32;
    let n = (u64::from(rate) * ms / 1000) as usize;
    let samples: Vec<f32> = (0..n)
        .map(|i| 0.05 * (i as f32 * 0.05).sin())
        .collect();
    parley::audio::wav::encode_pcm16(&samples, rate).expect("encode wav")
}

// ─── Scripted services ───────────────────────────────────────────────────────

/// One scripted service answer.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Answer at once.
    Ok(String),
    /// Answer after a delay.
    Delay(Duration, String),
    /// Fail with a transport error.
    Fail(String),
    /// Fail with an error that is not about the transport.
    Broken(String),
}

async fn play(step: Step, stage: Stage) -> parley::Result<String> {
    match step {
        Step::Ok(text) => Ok(text),
        Step::Delay(delay, text) => {
            tokio::time::sleep(delay).await;
            Ok(text)
        }
        Step::Fail(message) => Err(SpeechError::transport(stage, message)),
        Step::Broken(message) => Err(SpeechError::Audio(message)),
    }
}

struct Script {
    steps: Mutex<VecDeque<Step>>,
    fallback: String,
}

impl Script {
    fn new(fallback: &str) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: fallback.to_owned(),
        }
    }

    fn next(&self) -> Step {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Ok(self.fallback.clone()))
    }

    fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }
}

/// Transcription mock: answers from its script, then with a fallback text.
pub(crate) struct MockTranscription {
    script: Script,
    calls: Mutex<Vec<u64>>,
}

impl MockTranscription {
    pub(crate) fn push(&self, step: Step) {
        self.script.push(step);
    }

    /// Turn ids of every request, in order.
    pub(crate) fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptionClient for MockTranscription {
    async fn transcribe(
        &self,
        audio: Bytes,
        turn_id: TurnId,
    ) -> parley::Result<TranscriptionResult> {
        assert!(audio.starts_with(b"RIFF"), "utterance should be sent as WAV");
        self.calls.lock().unwrap().push(turn_id.get());
        let text = play(self.script.next(), Stage::Transcription).await?;
        Ok(TranscriptionResult {
            text,
            duration_ms: 0,
        })
    }
}

/// Reply mock.
pub(crate) struct MockReply {
    script: Script,
    calls: Mutex<Vec<(String, u64)>>,
}

impl MockReply {
    pub(crate) fn push(&self, step: Step) {
        self.script.push(step);
    }

    /// `(user text, turn id)` of every request, in order.
    pub(crate) fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyClient for MockReply {
    async fn generate(
        &self,
        text: &str,
        _mode: Option<&str>,
        turn_id: TurnId,
    ) -> parley::Result<ReplyResult> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_owned(), turn_id.get()));
        let text = play(self.script.next(), Stage::Reply).await?;
        Ok(ReplyResult {
            text,
            ..ReplyResult::default()
        })
    }
}

/// Synthesis mock: every text becomes `audio_ms` of WAV.
pub(crate) struct MockSynthesis {
    script: Script,
    audio_ms: u64,
    calls: Mutex<Vec<(String, u64)>>,
}

impl MockSynthesis {
    pub(crate) fn push(&self, step: Step) {
        self.script.push(step);
    }

    /// `(text, turn id)` of every request, in order.
    pub(crate) fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisClient for MockSynthesis {
    async fn synthesize(&self, text: &str, turn_id: TurnId) -> parley::Result<SynthesisResult> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_owned(), turn_id.get()));
        play(self.script.next(), Stage::Synthesis).await?;
        Ok(SynthesisResult {
            audio: Bytes::from(wav_of(self.audio_ms)),
        })
    }
}

/// The three scripted services of one session.
pub(crate) struct Mocks {
    pub(crate) transcription: Arc<MockTranscription>,
    pub(crate) reply: Arc<MockReply>,
    pub(crate) synthesis: Arc<MockSynthesis>,
}

impl Mocks {
    /// Services that answer "hello" / "Sure." / `synthesis_ms` of audio.
    pub(crate) fn new(synthesis_ms: u64) -> Self {
        Self {
            transcription: Arc::new(MockTranscription {
                script: Script::new("hello"),
                calls: Mutex::new(Vec::new()),
            }),
            reply: Arc::new(MockReply {
                script: Script::new("Sure."),
                calls: Mutex::new(Vec::new()),
            }),
            synthesis: Arc::new(MockSynthesis {
                script: Script::new(""),
                audio_ms: synthesis_ms,
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn services(&self) -> SessionServices {
        SessionServices {
            transcription: self.transcription.clone(),
            reply: self.reply.clone(),
            synthesis: self.synthesis.clone(),
        }
    }
}

// ─── Recording speaker ───────────────────────────────────────────────────────

/// A segment the sink was asked to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Played {
    pub(crate) text: String,
    pub(crate) pause_before_ms: u64,
    pub(crate) turn_id: u64,
}

#[derive(Default)]
struct SinkLog {
    played: Vec<Played>,
    halts: usize,
    sounding: Option<SegmentHandle>,
}

/// Speaker stand-in. In auto mode every segment finishes as soon as it
/// starts; in manual mode it sounds until [`RecordingSink::finish_current`].
#[derive(Clone)]
pub(crate) struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    auto_finish: bool,
}

impl RecordingSink {
    pub(crate) fn auto() -> Self {
        Self {
            log: Arc::default(),
            auto_finish: true,
        }
    }

    pub(crate) fn manual() -> Self {
        Self {
            log: Arc::default(),
            auto_finish: false,
        }
    }

    pub(crate) fn played(&self) -> Vec<Played> {
        self.log.lock().unwrap().played.clone()
    }

    pub(crate) fn played_texts(&self) -> Vec<String> {
        self.played().into_iter().map(|p| p.text).collect()
    }

    pub(crate) fn halts(&self) -> usize {
        self.log.lock().unwrap().halts
    }

    /// Report the sounding segment as finished. Returns false if none.
    pub(crate) fn finish_current(&self) -> bool {
        match self.log.lock().unwrap().sounding.take() {
            Some(handle) => {
                handle.finished();
                true
            }
            None => false,
        }
    }
}

impl AudioSink for RecordingSink {
    fn start(&mut self, segment: &PlaybackSegment, handle: SegmentHandle) -> parley::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.played.push(Played {
            text: segment.text.clone(),
            pause_before_ms: segment.pause_before_ms,
            turn_id: segment.turn_id.get(),
        });
        if self.auto_finish {
            handle.finished();
        } else {
            log.sounding = Some(handle);
        }
        Ok(())
    }

    fn halt(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.halts += 1;
        log.sounding = None;
    }
}

// ─── Microphone ──────────────────────────────────────────────────────────────

/// Pushes synthetic 20 ms frames into a session.
///
/// Timestamps run ahead of the wall clock so seconds of audio can be fed
/// instantly; they never fall behind it.
pub(crate) struct FrameFeeder {
    tx: mpsc::Sender<AudioFrame>,
    seq: u64,
    last: Option<Instant>,
    gap_ms: u64,
}

impl FrameFeeder {
    /// Feed `ms` of constant-level audio.
    pub(crate) async fn push(&mut self, level: f32, ms: u64) {
        for _ in 0..ms / FRAME_MS {
            let wall = Instant::now();
            let captured_at = self
                .last
                .map_or(wall, |t| (t + Duration::from_millis(FRAME_MS)).max(wall));
            self.last = Some(captured_at);
            let frame = AudioFrame {
                samples: vec![level; FRAME_SAMPLES],
                sample_rate: RATE,
                seq: self.seq,
                captured_at,
            };
            self.seq += 1;
            self.tx.send(frame).await.expect("session stopped consuming frames");
        }
    }

    pub(crate) async fn speech(&mut self, ms: u64) {
        self.push(SPEECH, ms).await;
    }

    pub(crate) async fn loud(&mut self, ms: u64) {
        self.push(LOUD, ms).await;
    }

    pub(crate) async fn silence(&mut self, ms: u64) {
        self.push(0.0, ms).await;
    }

    /// Speech followed by enough silence to end the utterance.
    pub(crate) async fn utterance(&mut self, ms: u64) {
        self.speech(ms).await;
        self.silence(self.gap_ms + 200).await;
    }
}

// ─── Session harness ─────────────────────────────────────────────────────────

/// A running session plus everything needed to drive and observe it.
pub(crate) struct Harness {
    pub(crate) mic: FrameFeeder,
    pub(crate) events: broadcast::Receiver<RuntimeEvent>,
    pub(crate) state: watch::Receiver<SessionAudioState>,
    pub(crate) turns: TurnController,
    pub(crate) mocks: Mocks,
    pub(crate) sink: RecordingSink,
    /// Every event received so far, in order.
    pub(crate) seen: Vec<RuntimeEvent>,
    pub(crate) flush: FlushHandle,
    cancel: CancellationToken,
    task: JoinHandle<parley::Result<()>>,
}

impl Harness {
    pub(crate) fn start(config: SpeechConfig, mocks: Mocks, sink: RecordingSink) -> Self {
        let services = mocks.services();
        Self::start_with_services(config, services, mocks, sink)
    }

    /// Run against `services`; `mocks` only serve as call logs.
    pub(crate) fn start_with_services(
        config: SpeechConfig,
        services: SessionServices,
        mocks: Mocks,
        sink: RecordingSink,
    ) -> Self {
        let gap_ms = u64::from(config.segmenter.speech_max_gap_ms);
        let (frame_tx, source) = ChannelFrameSource::new(256);
        let (event_tx, events) = broadcast::channel(1024);
        let session = SessionController::new(config, services, Box::new(sink.clone()))
            .with_runtime_events(event_tx);
        let state = session.state();
        let turns = session.turns();
        let cancel = session.cancel_token();
        let flush = session.flush_handle();
        let task = tokio::spawn(session.run(Box::new(source)));
        Self {
            mic: FrameFeeder {
                tx: frame_tx,
                seq: 0,
                last: None,
                gap_ms,
            },
            events,
            state,
            turns,
            mocks,
            sink,
            seen: Vec::new(),
            flush,
            cancel,
            task,
        }
    }

    /// Wait for the first event matching `pred`, skipping others.
    pub(crate) async fn expect_event(
        &mut self,
        what: &str,
        pred: impl Fn(&RuntimeEvent) -> bool,
    ) -> RuntimeEvent {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Ok(event) => {
                        self.seen.push(event.clone());
                        if pred(&event) {
                            return event;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("session ended while waiting for {what}")
                    }
                }
            }
        };
        tokio::time::timeout(WAIT, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    /// Wait until the published state satisfies `pred`.
    pub(crate) async fn expect_state(
        &mut self,
        what: &str,
        pred: impl FnMut(&SessionAudioState) -> bool,
    ) -> SessionAudioState {
        let state = tokio::time::timeout(WAIT, self.state.wait_for(pred))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for state: {what}"))
            .expect("state channel closed");
        state.clone()
    }

    /// Pull in events that are already queued without waiting.
    pub(crate) fn drain_events(&mut self) -> &[RuntimeEvent] {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    /// Let the session run for `ms` of wall time, then collect its events.
    pub(crate) async fn settle(&mut self, ms: u64) -> &[RuntimeEvent] {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.drain_events()
    }

    /// Cancel the session and return its result.
    pub(crate) async fn stop(self) -> parley::Result<()> {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not stop")
            .expect("session task panicked")
    }
}
