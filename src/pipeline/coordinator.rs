//! Per-session turn-taking controller.
//!
//! One task owns every piece of session state (detector, segmenter, queue,
//! barge-in) and reacts to four inputs in a single `select!` loop: captured
//! frames, sink completions, results of external calls, and a periodic tick.
//! External calls run as spawned tasks and report back as [`StageResult`]
//! messages tagged with the turn they were started for; results for a turn
//! that is no longer current are dropped on arrival.

use crate::audio::capture::FrameSource;
use crate::audio::playback::{AudioSink, SinkEvent};
use crate::audio::wav;
use crate::config::{ServiceConfig, SpeechConfig};
use crate::error::{Result, SpeechError, Stage};
use crate::llm::{HttpReplyClient, ReplyClient, ReplyResult};
use crate::pipeline::barge_in::{BargeInContext, BargeInCoordinator, BargeInDecision};
use crate::pipeline::messages::{AudioFrame, ControlEvent, PlaybackSegment, TurnId, Utterance};
use crate::pipeline::pause::{PauseSegment, split_pause_segments, strip_pause_markers};
use crate::pipeline::queue::{PlaybackNotice, PlaybackQueue};
use crate::pipeline::state::{SessionAudioState, SessionPhase};
use crate::pipeline::turn::{TurnAbandonReason, TurnController, TurnState};
use crate::runtime::RuntimeEvent;
use crate::stt::{HttpTranscriptionClient, TranscriptionClient, TranscriptionResult};
use crate::tts::{HttpSynthesisClient, SynthesisClient, SynthesisResult};
use crate::vad::VoiceActivityDetector;
use crate::vad::segmenter::{SegmenterEvent, SpeechSegmenter};
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Channel buffer sizes.
const AUDIO_CHANNEL_SIZE: usize = 64;

/// Housekeeping interval: gap polling and the mic watchdog.
const TICK: Duration = Duration::from_millis(50);

/// Seconds without any non-zero sample before the mic is reported silent.
const MIC_WATCHDOG_SECS: u64 = 5;

/// Samples below this magnitude count as digital silence for the watchdog.
const MIC_SILENCE_FLOOR: f32 = 1e-4;

/// The three external collaborators a session talks to.
#[derive(Clone)]
pub struct SessionServices {
    /// Speech-to-text.
    pub transcription: Arc<dyn TranscriptionClient>,
    /// Reply generation.
    pub reply: Arc<dyn ReplyClient>,
    /// Text-to-speech.
    pub synthesis: Arc<dyn SynthesisClient>,
}

impl SessionServices {
    /// HTTP clients for the configured endpoints.
    pub fn http(config: &ServiceConfig) -> Self {
        Self {
            transcription: Arc::new(HttpTranscriptionClient::new(config)),
            reply: Arc::new(HttpReplyClient::new(config)),
            synthesis: Arc::new(HttpSynthesisClient::new(config)),
        }
    }
}

/// Result of an external call, delivered back to the controller task.
enum StageResult {
    Transcribed {
        turn_id: TurnId,
        result: Result<TranscriptionResult>,
    },
    Replied {
        turn_id: TurnId,
        result: Result<ReplyResult>,
    },
    Synthesized {
        turn_id: TurnId,
        index: u64,
        result: Result<SynthesisResult>,
    },
}

/// Remaining work for a reply synthesized piece by piece.
struct ReplyPlan {
    turn_id: TurnId,
    parts: VecDeque<PauseSegment>,
    /// Part awaiting synthesis, with its dispatch index.
    in_flight: Option<(u64, PauseSegment)>,
    next_index: u64,
}

impl ReplyPlan {
    fn is_exhausted(&self) -> bool {
        self.parts.is_empty() && self.in_flight.is_none()
    }
}

/// Ends the user's utterance now instead of waiting for the silence gap.
///
/// Useful for push-to-talk style front ends. A flush with no speech in
/// progress does nothing.
#[derive(Clone)]
pub struct FlushHandle {
    notify: Arc<Notify>,
}

impl FlushHandle {
    /// Seal (or discard, if too short) the utterance being captured.
    pub fn flush(&self) {
        self.notify.notify_one();
    }
}

/// Runs one voice session until cancelled.
pub struct SessionController {
    config: SpeechConfig,
    services: SessionServices,
    sink: Box<dyn AudioSink>,
    cancel: CancellationToken,
    flush: Arc<Notify>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    turns: TurnController,
    state_tx: watch::Sender<SessionAudioState>,
}

impl SessionController {
    /// Create a controller that plays replies through `sink`.
    pub fn new(config: SpeechConfig, services: SessionServices, sink: Box<dyn AudioSink>) -> Self {
        let (state_tx, _) = watch::channel(SessionAudioState::default());
        Self {
            config,
            services,
            sink,
            cancel: CancellationToken::new(),
            flush: Arc::new(Notify::new()),
            runtime_tx: None,
            turns: TurnController::new(),
            state_tx,
        }
    }

    /// Attach a runtime event broadcaster for UI/observability.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Observe session state. The receiver sees every published change.
    pub fn state(&self) -> watch::Receiver<SessionAudioState> {
        self.state_tx.subscribe()
    }

    /// Shared handle to the session's turn bookkeeping.
    pub fn turns(&self) -> TurnController {
        self.turns.clone()
    }

    /// Token that stops the session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle that force-closes the utterance in progress.
    pub fn flush_handle(&self) -> FlushHandle {
        FlushHandle {
            notify: Arc::clone(&self.flush),
        }
    }

    /// Request shutdown. A partial utterance is discarded, not transcribed.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Capture from `source` and run turns until cancelled or the source ends.
    ///
    /// # Errors
    ///
    /// Returns the capture error if the source fails, including
    /// [`SpeechError::PermissionDenied`] when no microphone can be opened.
    /// Turn-level failures never end the session.
    pub async fn run(self, source: Box<dyn FrameSource>) -> Result<()> {
        self.config.validate()?;
        let session_id = uuid::Uuid::new_v4();
        info!("session {session_id} starting");

        let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(AUDIO_CHANNEL_SIZE);
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<SinkEvent>();
        let (stage_tx, mut stage_rx) = mpsc::unbounded_channel::<StageResult>();
        let cancel = self.cancel.clone();
        let flush = self.flush;

        let mut session = Session {
            vad: VoiceActivityDetector::new(&self.config.vad),
            segmenter: SpeechSegmenter::new(&self.config.segmenter),
            queue: PlaybackQueue::new(&self.config.playback, self.sink, sink_tx),
            barge_in: BargeInCoordinator::new(&self.config.barge_in),
            services: self.services,
            turns: self.turns,
            state: SessionAudioState::default(),
            published_phase: SessionPhase::Idle,
            state_tx: self.state_tx,
            runtime_tx: self.runtime_tx,
            stage_tx,
            speech_active: false,
            last_frame_at: None,
            reply: None,
            mic: MicWatchdog::new(Instant::now()),
            config: self.config,
        };

        let capture = tokio::spawn(source.run(frame_tx, cancel.clone()));
        session.state.is_recording = true;
        session.state.phase = SessionPhase::Listening;
        session.publish();

        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break };
                    session.on_frame(frame);
                }
                Some(event) = sink_rx.recv() => session.on_sink_event(event),
                Some(result) = stage_rx.recv() => session.on_stage_result(result),
                () = flush.notified() => session.on_flush(),
                _ = tick.tick() => session.on_tick(),
            }
            session.publish();
        }

        cancel.cancel();
        let outcome = match capture.await {
            Ok(result) => result,
            Err(e) => Err(SpeechError::Channel(format!("capture task failed: {e}"))),
        };
        session.stop();

        match outcome {
            Ok(()) => {
                info!("session {session_id} stopped");
                Ok(())
            }
            Err(e) => {
                error!("session {session_id} ended: {e}");
                session.emit(RuntimeEvent::SessionError {
                    stage: None,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

/// Reports whether the microphone delivers anything but digital silence.
struct MicWatchdog {
    started_at: Instant,
    heard_audio: bool,
    warned: bool,
}

impl MicWatchdog {
    fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            heard_audio: false,
            warned: false,
        }
    }

    /// Returns `Some(true)` on the first frame with real audio.
    fn observe(&mut self, frame: &AudioFrame) -> Option<bool> {
        if self.heard_audio || !frame.samples.iter().any(|s| s.abs() > MIC_SILENCE_FLOOR) {
            return None;
        }
        self.heard_audio = true;
        if self.warned {
            info!("mic audio detected after watchdog warning");
        }
        Some(true)
    }

    /// Returns `Some(false)` once if no audio arrived within the deadline.
    fn check(&mut self, now: Instant) -> Option<bool> {
        if self.heard_audio
            || self.warned
            || now.saturating_duration_since(self.started_at)
                <= Duration::from_secs(MIC_WATCHDOG_SECS)
        {
            return None;
        }
        warn!("mic watchdog: no audio detected after {MIC_WATCHDOG_SECS}s");
        self.warned = true;
        Some(false)
    }
}

/// Mutable state owned by the controller task.
struct Session {
    config: SpeechConfig,
    services: SessionServices,
    turns: TurnController,
    vad: VoiceActivityDetector,
    segmenter: SpeechSegmenter,
    queue: PlaybackQueue,
    barge_in: BargeInCoordinator,
    state: SessionAudioState,
    published_phase: SessionPhase,
    state_tx: watch::Sender<SessionAudioState>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    stage_tx: mpsc::UnboundedSender<StageResult>,
    /// Level of the VAD output, for edge detection.
    speech_active: bool,
    last_frame_at: Option<Instant>,
    reply: Option<ReplyPlan>,
    mic: MicWatchdog,
}

impl Session {
    /// Session clock: wall time, never behind the newest frame timestamp.
    fn now(&self) -> Instant {
        let wall = Instant::now();
        self.last_frame_at.map_or(wall, |t| t.max(wall))
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }

    fn emit_control(&self, event: ControlEvent) {
        self.emit(RuntimeEvent::Control(event));
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.state.phase = phase;
        self.state.is_processing = phase.is_processing();
    }

    fn publish(&mut self) {
        let now = self.now();
        self.state.suppress_until = self.vad.suppress_until().filter(|t| *t > now);
        if self.state.phase != self.published_phase {
            self.published_phase = self.state.phase;
            debug!("phase -> {}", self.state.phase);
            self.emit(RuntimeEvent::PhaseChanged(self.state.phase));
        }
        let state = &self.state;
        self.state_tx.send_if_modified(|current| {
            if current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
    }

    // ── Capture path ────────────────────────────────────────────

    fn on_frame(&mut self, frame: AudioFrame) {
        if let Some(active) = self.mic.observe(&frame) {
            self.emit(RuntimeEvent::MicStatus { active });
        }
        self.last_frame_at = Some(
            self.last_frame_at
                .map_or(frame.captured_at, |t| t.max(frame.captured_at)),
        );

        let out = self.vad.observe(&frame);
        if out.is_speech != self.speech_active {
            self.speech_active = out.is_speech;
            self.state.is_speech_active = out.is_speech;
            self.emit_control(if out.is_speech {
                ControlEvent::UserSpeechStart {
                    captured_at: frame.captured_at,
                    rms: out.rms,
                }
            } else {
                ControlEvent::UserSpeechEnd
            });
        }

        let mut is_speech = out.is_speech;
        if is_speech && self.barge_in.is_armed() {
            let decision = self.barge_in.on_speech_activity_changed(
                true,
                frame.captured_at,
                BargeInContext {
                    queue: &mut self.queue,
                    vad: &mut self.vad,
                    turns: &self.turns,
                },
            );
            match decision {
                BargeInDecision::Interrupted {
                    playback_turn,
                    cancelled_turn,
                } => self.after_barge_in(playback_turn, cancelled_turn),
                // Speech the assistant may be hearing of itself; keep it out
                // of the segmenter.
                _ => is_speech = false,
            }
        }

        if let Some(event) = self.segmenter.feed(frame, is_speech) {
            self.on_segmenter_event(event);
        }
    }

    fn after_barge_in(&mut self, playback_turn: Option<TurnId>, cancelled_turn: Option<TurnId>) {
        self.reply = None;
        let turn = playback_turn.or(cancelled_turn);
        if let Some(turn_id) = turn {
            self.emit_control(ControlEvent::AssistantSpeechEnd {
                turn_id,
                interrupted: true,
            });
        }
        self.emit(RuntimeEvent::BargeIn { turn_id: turn });
        if let Some(turn_id) = cancelled_turn {
            self.emit(RuntimeEvent::TurnAbandoned {
                turn_id,
                reason: TurnAbandonReason::Interrupted,
            });
        }
        self.state.reset_neutral();
        self.state.is_speech_active = self.speech_active;
        self.set_phase(SessionPhase::Interrupted);
    }

    fn on_segmenter_event(&mut self, event: SegmenterEvent) {
        match event {
            SegmenterEvent::Discarded { voiced } => {
                info!("discarding {}ms speech burst (noise)", voiced.as_millis());
                self.emit(RuntimeEvent::UtteranceDiscarded { voiced });
                if self.state.phase == SessionPhase::Interrupted {
                    self.set_phase(SessionPhase::Listening);
                }
            }
            SegmenterEvent::Sealed(utterance) => self.begin_turn(&utterance),
        }
    }

    fn on_flush(&mut self) {
        if let Some(event) = self.segmenter.flush() {
            debug!("utterance flushed on request");
            self.on_segmenter_event(event);
        }
    }

    fn on_tick(&mut self) {
        let now = self.now();
        if let Some(active) = self.mic.check(now) {
            self.emit(RuntimeEvent::MicStatus { active });
        }
        if let Some(event) = self.segmenter.poll(now) {
            self.on_segmenter_event(event);
        }
    }

    // ── Turn lifecycle ──────────────────────────────────────────

    fn begin_turn(&mut self, utterance: &Utterance) {
        self.reply = None;
        self.cut_off_playback();
        let turn_id = self.turns.begin_turn(utterance);
        // Nothing is on the speaker any more, so no suppression is owed.
        self.vad.reset();
        self.speech_active = false;
        info!(
            "turn {turn_id}: began from {}ms utterance",
            utterance.duration().as_millis()
        );
        self.emit(RuntimeEvent::TurnStarted {
            turn_id,
            utterance: utterance.duration(),
        });

        let audio = match wav::encode_pcm16(utterance.samples(), utterance.sample_rate()) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                self.abandon(
                    turn_id,
                    TurnAbandonReason::TransportFailure {
                        stage: Stage::Transcription,
                        message: e.to_string(),
                    },
                );
                return;
            }
        };

        self.state.current_turn_id = Some(turn_id);
        self.state.is_speech_active = false;
        self.set_phase(SessionPhase::Transcribing);

        let client = Arc::clone(&self.services.transcription);
        self.spawn_stage(
            Stage::Transcription,
            self.config.services.transcription_timeout_ms,
            async move { client.transcribe(audio, turn_id).await },
            move |result| StageResult::Transcribed { turn_id, result },
        );
    }

    /// Silence whatever an earlier turn still has queued or sounding.
    fn cut_off_playback(&mut self) {
        let was_speaking = self.state.is_agent_speaking || self.queue.is_speaking();
        let Some(old) = self.queue.interrupt() else {
            return;
        };
        self.barge_in.on_playback_stopped();
        self.state.is_agent_speaking = false;
        if was_speaking {
            info!("turn {old}: playback cut off by a new utterance");
            self.emit_control(ControlEvent::AssistantSpeechEnd {
                turn_id: old,
                interrupted: true,
            });
        }
    }

    fn on_stage_result(&mut self, result: StageResult) {
        match result {
            StageResult::Transcribed { turn_id, result } => {
                if self.is_stale(turn_id, "transcription") {
                    return;
                }
                match result {
                    Ok(t) => self.on_transcribed(turn_id, t),
                    Err(e) => self.fail(turn_id, Stage::Transcription, e),
                }
            }
            StageResult::Replied { turn_id, result } => {
                if self.is_stale(turn_id, "reply") {
                    return;
                }
                match result {
                    Ok(reply) => self.on_reply(turn_id, reply),
                    Err(e) => self.fail(turn_id, Stage::Reply, e),
                }
            }
            StageResult::Synthesized {
                turn_id,
                index,
                result,
            } => {
                if self.is_stale(turn_id, "synthesis") {
                    return;
                }
                match result {
                    Ok(s) => self.on_synthesized(turn_id, index, s),
                    Err(e) => self.fail(turn_id, Stage::Synthesis, e),
                }
            }
        }
    }

    fn is_stale(&self, turn_id: TurnId, what: &str) -> bool {
        if self.turns.is_current(turn_id) {
            return false;
        }
        debug!("turn {turn_id}: ignoring stale {what} result");
        true
    }

    fn on_transcribed(&mut self, turn_id: TurnId, transcription: TranscriptionResult) {
        let text = transcription.text.trim().to_owned();
        if text.is_empty() {
            info!("turn {turn_id}: empty transcription, abandoning");
            self.abandon(turn_id, TurnAbandonReason::EmptyTranscription);
            return;
        }
        info!("turn {turn_id}: transcribed {} chars", text.len());
        self.turns.record_utterance_text(turn_id, &text);
        self.turns.advance(turn_id, TurnState::GeneratingReply);
        self.emit(RuntimeEvent::Transcription {
            turn_id,
            text: text.clone(),
        });
        self.set_phase(SessionPhase::GeneratingReply);

        let client = Arc::clone(&self.services.reply);
        let mode = self.config.services.reply_mode.clone();
        self.spawn_stage(
            Stage::Reply,
            self.config.services.reply_timeout_ms,
            async move { client.generate(&text, mode.as_deref(), turn_id).await },
            move |result| StageResult::Replied { turn_id, result },
        );
    }

    fn on_reply(&mut self, turn_id: TurnId, reply: ReplyResult) {
        let display = strip_pause_markers(&reply.text);
        self.turns.record_reply_text(turn_id, &display);
        if !display.is_empty() {
            self.emit(RuntimeEvent::AssistantReply {
                turn_id,
                text: display.clone(),
            });
        }
        if let Some(value) = reply.structured_extract {
            self.emit(RuntimeEvent::StructuredExtract { turn_id, value });
        }

        if let Some(audio) = reply.audio {
            debug!("turn {turn_id}: reply carried its own audio");
            self.turns.advance(turn_id, TurnState::Playing);
            self.enqueue(vec![PlaybackSegment {
                text: display,
                audio,
                pause_before_ms: 0,
                turn_id,
            }]);
            return;
        }

        let parts: VecDeque<PauseSegment> = split_pause_segments(&reply.text).into();
        if parts.iter().all(|p| p.text.is_empty()) {
            info!("turn {turn_id}: reply has nothing to say");
            self.complete(turn_id);
            return;
        }
        debug!("turn {turn_id}: synthesizing {} segments", parts.len());
        self.turns.advance(turn_id, TurnState::Synthesizing);
        self.set_phase(SessionPhase::Synthesizing);
        self.reply = Some(ReplyPlan {
            turn_id,
            parts,
            in_flight: None,
            next_index: 0,
        });
        self.pump_synthesis();
    }

    fn on_synthesized(&mut self, turn_id: TurnId, index: u64, result: SynthesisResult) {
        let Some(plan) = self.reply.as_mut().filter(|p| p.turn_id == turn_id) else {
            return;
        };
        let Some((_, part)) = plan.in_flight.take_if(|(i, _)| *i == index) else {
            debug!("turn {turn_id}: ignoring out-of-order synthesis {index}");
            return;
        };
        self.enqueue(vec![PlaybackSegment {
            text: part.text,
            audio: result.audio,
            pause_before_ms: part.pause_before_ms,
            turn_id,
        }]);
        self.pump_synthesis();
    }

    /// Dispatch synthesis for the next parts while the queue has room.
    fn pump_synthesis(&mut self) {
        loop {
            let Some(plan) = self.reply.as_mut() else {
                return;
            };
            if !self.turns.is_current(plan.turn_id) {
                self.reply = None;
                return;
            }
            if plan.in_flight.is_some() || self.queue.len() >= self.queue.capacity() {
                return;
            }
            let Some(part) = plan.parts.pop_front() else {
                return;
            };
            let turn_id = plan.turn_id;

            if part.text.is_empty() {
                // Pause-only: nothing to synthesize, the silence is the segment.
                self.enqueue(vec![PlaybackSegment {
                    text: String::new(),
                    audio: Bytes::new(),
                    pause_before_ms: part.pause_before_ms,
                    turn_id,
                }]);
                continue;
            }

            let index = plan.next_index;
            plan.next_index += 1;
            let text = part.text.clone();
            plan.in_flight = Some((index, part));

            let client = Arc::clone(&self.services.synthesis);
            self.spawn_stage(
                Stage::Synthesis,
                self.config.services.synthesis_timeout_ms,
                async move { client.synthesize(&text, turn_id).await },
                move |result| StageResult::Synthesized {
                    turn_id,
                    index,
                    result,
                },
            );
        }
    }

    fn spawn_stage<F, T>(
        &self,
        stage: Stage,
        budget_ms: u64,
        call: F,
        wrap: impl FnOnce(Result<T>) -> StageResult + Send + 'static,
    ) where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let tx = self.stage_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(Duration::from_millis(budget_ms), call).await {
                Ok(result) => result,
                Err(_) => Err(SpeechError::Timeout {
                    stage,
                    after_ms: budget_ms,
                }),
            };
            let _ = tx.send(wrap(result));
        });
    }

    // ── Playback path ───────────────────────────────────────────

    fn enqueue(&mut self, segments: Vec<PlaybackSegment>) {
        let now = self.now();
        let turn_id = segments.first().map(|s| s.turn_id);
        let report = self.queue.enqueue(segments, &self.turns, now);
        if report.stale > 0 {
            debug!("refused {} stale segments", report.stale);
        }
        if report.evicted > 0
            && let Some(turn_id) = turn_id
        {
            self.emit(RuntimeEvent::QueueOverflow {
                turn_id,
                dropped: report.evicted,
            });
        }
        self.refresh_suppression(now);
        self.on_notices(report.notices, now);
    }

    fn on_sink_event(&mut self, event: SinkEvent) {
        let now = self.now();
        let notices = self.queue.on_sink_event(event, now);
        self.on_notices(notices, now);
    }

    /// Keep the suppression window past the estimated end of queued audio.
    fn refresh_suppression(&mut self, now: Instant) {
        if self.queue.is_speaking() {
            let remaining = self.queue.remaining_duration(now);
            self.vad.suppress_for(remaining, now);
        }
    }

    fn on_notices(&mut self, notices: Vec<PlaybackNotice>, now: Instant) {
        for notice in notices {
            match notice {
                PlaybackNotice::SegmentStarted {
                    turn_id,
                    first_in_turn,
                } => {
                    self.refresh_suppression(now);
                    if !self.turns.is_current(turn_id) {
                        debug!("turn {turn_id}: ignoring playback start of stale turn");
                        continue;
                    }
                    if first_in_turn {
                        info!("turn {turn_id}: assistant speaking");
                        self.barge_in.on_playback_started(now);
                        self.turns.advance(turn_id, TurnState::Playing);
                        self.emit_control(ControlEvent::AssistantSpeechStart { turn_id });
                    }
                    self.state.is_agent_speaking = true;
                    self.set_phase(SessionPhase::Playing);
                }
                PlaybackNotice::SegmentEnded { .. } => self.pump_synthesis(),
                PlaybackNotice::Drained { turn_id } => {
                    if !self.turns.is_current(turn_id) {
                        continue;
                    }
                    let more_coming = self
                        .reply
                        .as_ref()
                        .is_some_and(|p| p.turn_id == turn_id && !p.is_exhausted());
                    if !more_coming {
                        self.complete(turn_id);
                    }
                }
                PlaybackNotice::Halted { turn_id } => {
                    self.barge_in.on_playback_stopped();
                    self.emit_control(ControlEvent::AssistantSpeechEnd {
                        turn_id,
                        interrupted: true,
                    });
                }
            }
        }
    }

    /// Finish `turn_id` and go back to listening. No-op for a stale turn.
    fn complete(&mut self, turn_id: TurnId) {
        if !self.turns.complete(turn_id) {
            debug!("turn {turn_id}: not current, nothing to complete");
            return;
        }
        info!("turn {turn_id}: completed");
        self.emit(RuntimeEvent::TurnCompleted { turn_id });
        let was_speaking = self.state.is_agent_speaking;
        self.reply = None;
        self.barge_in.on_playback_stopped();
        if was_speaking {
            self.emit_control(ControlEvent::AssistantSpeechEnd {
                turn_id,
                interrupted: false,
            });
        }
        self.state.reset_neutral();
        self.state.is_speech_active = self.speech_active;
    }

    fn fail(&mut self, turn_id: TurnId, stage: Stage, error: SpeechError) {
        warn!("turn {turn_id}: {error}");
        self.emit(RuntimeEvent::SessionError {
            stage: Some(stage),
            message: error.to_string(),
        });
        self.abandon(
            turn_id,
            TurnAbandonReason::TransportFailure {
                stage,
                message: error.to_string(),
            },
        );
    }

    /// Drop the turn and go back to listening. No-op for a stale turn.
    fn abandon(&mut self, turn_id: TurnId, reason: TurnAbandonReason) {
        if !self.turns.is_current(turn_id) {
            debug!("turn {turn_id}: not current, nothing to abandon");
            return;
        }
        self.turns.cancel_current();
        if self.reply.as_ref().is_some_and(|p| p.turn_id == turn_id) {
            self.reply = None;
        }
        if self.queue.active_turn() == Some(turn_id) {
            // Between segments nothing sounds, but the turn has been heard.
            let was_speaking = self.state.is_agent_speaking || self.queue.is_speaking();
            self.queue.interrupt();
            self.barge_in.on_playback_stopped();
            if was_speaking {
                self.emit_control(ControlEvent::AssistantSpeechEnd {
                    turn_id,
                    interrupted: true,
                });
            }
        }
        info!("turn {turn_id}: abandoned ({reason:?})");
        self.emit(RuntimeEvent::TurnAbandoned { turn_id, reason });
        self.state.reset_neutral();
        self.state.is_speech_active = self.speech_active;
    }

    /// Shut down: halt playback, drop the turn and any partial utterance.
    fn stop(&mut self) {
        if self.queue.interrupt().is_some() {
            debug!("playback halted at shutdown");
        }
        self.turns.cancel_current();
        self.reply = None;
        self.segmenter.reset();
        self.vad.reset();
        self.speech_active = false;
        self.state.is_recording = false;
        self.state.reset_neutral();
        self.publish();
    }
}
