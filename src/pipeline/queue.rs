//! Bounded playback queue: the only path to the speaker.
//!
//! Segments of the current turn play strictly in order, one at a time.
//! Stale-turn segments are refused at the door, a newer turn displaces an
//! older one, and past `max_queue_size` the oldest unplayed segments are
//! evicted so latency stays bounded.

use crate::audio::playback::{AudioSink, SegmentHandle, SinkEvent};
use crate::config::PlaybackConfig;
use crate::pipeline::messages::{PlaybackSegment, TurnId};
use crate::pipeline::turn::TurnController;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Playback transitions the controller reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackNotice {
    /// A segment began sounding.
    SegmentStarted {
        /// Owning turn.
        turn_id: TurnId,
        /// Whether this is the turn's first audible segment.
        first_in_turn: bool,
    },
    /// A segment finished (or failed) and left the speaker.
    SegmentEnded {
        /// Owning turn.
        turn_id: TurnId,
    },
    /// Nothing left to play for this turn.
    Drained {
        /// Turn whose audio ran out.
        turn_id: TurnId,
    },
    /// Audio of an older turn was cut off by a newer turn's segments.
    Halted {
        /// Turn that was cut off.
        turn_id: TurnId,
    },
}

/// Outcome of one [`PlaybackQueue::enqueue`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnqueueReport {
    /// Segments added to the queue.
    pub accepted: usize,
    /// Segments refused because their turn is no longer current.
    pub stale: usize,
    /// Queued segments of an older turn dropped in favour of this one.
    pub superseded: usize,
    /// Unplayed segments evicted to stay within capacity.
    pub evicted: usize,
    /// Transitions caused by the call.
    pub notices: Vec<PlaybackNotice>,
}

struct Sounding {
    playback_id: u64,
    turn_id: TurnId,
    started_at: Instant,
    estimated: Duration,
}

/// Bounded, interruptible queue in front of an [`AudioSink`].
pub struct PlaybackQueue {
    max_queue_size: usize,
    sink: Box<dyn AudioSink>,
    sink_tx: mpsc::UnboundedSender<SinkEvent>,
    pending: VecDeque<PlaybackSegment>,
    sounding: Option<Sounding>,
    /// Turn whose segments currently own the queue.
    active_turn: Option<TurnId>,
    /// Turn that already produced sound, for `first_in_turn`.
    audible_turn: Option<TurnId>,
    next_playback_id: u64,
}

impl PlaybackQueue {
    /// Create a queue driving `sink`. Sink completions must be sent on
    /// `sink_tx` and fed back through [`PlaybackQueue::on_sink_event`].
    pub fn new(
        config: &PlaybackConfig,
        sink: Box<dyn AudioSink>,
        sink_tx: mpsc::UnboundedSender<SinkEvent>,
    ) -> Self {
        Self {
            max_queue_size: config.max_queue_size.max(1),
            sink,
            sink_tx,
            pending: VecDeque::new(),
            sounding: None,
            active_turn: None,
            audible_turn: None,
            next_playback_id: 0,
        }
    }

    /// Number of unplayed segments waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no segment is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Maximum number of unplayed segments held.
    pub fn capacity(&self) -> usize {
        self.max_queue_size
    }

    /// Whether a segment is on the speaker.
    pub fn is_speaking(&self) -> bool {
        self.sounding.is_some()
    }

    /// Turn that owns the queue, if any.
    pub fn active_turn(&self) -> Option<TurnId> {
        self.active_turn
    }

    /// Estimated time until everything queued has played.
    pub fn remaining_duration(&self, now: Instant) -> Duration {
        let sounding = self.sounding.as_ref().map_or(Duration::ZERO, |s| {
            s.estimated
                .saturating_sub(now.saturating_duration_since(s.started_at))
        });
        self.pending
            .iter()
            .map(PlaybackSegment::estimated_duration)
            .fold(sounding, |acc, d| acc + d)
    }

    /// Add segments in order. Segments whose turn is not current are refused.
    pub fn enqueue(
        &mut self,
        segments: Vec<PlaybackSegment>,
        turns: &TurnController,
        now: Instant,
    ) -> EnqueueReport {
        let mut report = EnqueueReport::default();

        for segment in segments {
            if !turns.is_current(segment.turn_id) {
                debug!("turn {}: refusing stale segment", segment.turn_id);
                report.stale += 1;
                continue;
            }
            if self.active_turn != Some(segment.turn_id) {
                self.take_over(segment.turn_id, &mut report);
            }
            self.pending.push_back(segment);
            report.accepted += 1;

            while self.pending.len() > self.max_queue_size {
                if let Some(dropped) = self.pending.pop_front() {
                    report.evicted += 1;
                    warn!(
                        "turn {}: playback queue full ({}), dropping oldest unplayed segment",
                        dropped.turn_id, self.max_queue_size
                    );
                }
            }
        }

        if self.sounding.is_none() && !self.pending.is_empty() {
            self.start_next(now, &mut report.notices);
        }
        report
    }

    /// Halt the sounding segment and discard everything queued, for every
    /// turn. Returns the turn that owned the queue.
    ///
    /// `is_speaking` is false as soon as this returns, and any completion
    /// the sink reports for the halted segment is ignored.
    pub fn interrupt(&mut self) -> Option<TurnId> {
        if self.sounding.take().is_some() {
            self.sink.halt();
        }
        let dropped = self.pending.len();
        self.pending.clear();
        self.audible_turn = None;
        let turn = self.active_turn.take();
        if let Some(turn) = turn {
            info!("turn {turn}: playback interrupted, {dropped} queued segments dropped");
        }
        turn
    }

    /// Feed a sink completion. Reports for anything but the sounding
    /// segment are ignored.
    pub fn on_sink_event(&mut self, event: SinkEvent, now: Instant) -> Vec<PlaybackNotice> {
        let mut notices = Vec::new();
        let playback_id = match &event {
            SinkEvent::Finished { playback_id } | SinkEvent::Failed { playback_id, .. } => {
                *playback_id
            }
        };
        let Some(sounding) = self
            .sounding
            .take_if(|s| s.playback_id == playback_id)
        else {
            debug!("ignoring completion for stale playback {playback_id}");
            return notices;
        };
        if let SinkEvent::Failed { message, .. } = &event {
            warn!("turn {}: segment playback failed: {message}", sounding.turn_id);
        }
        notices.push(PlaybackNotice::SegmentEnded {
            turn_id: sounding.turn_id,
        });
        self.start_next(now, &mut notices);
        notices
    }

    /// Make `turn_id` the owner, cutting off whatever older turn is queued.
    fn take_over(&mut self, turn_id: TurnId, report: &mut EnqueueReport) {
        report.superseded += self.pending.len();
        self.pending.clear();
        if let Some(old) = self.sounding.take() {
            self.sink.halt();
            debug!("turn {}: halted by turn {turn_id}", old.turn_id);
            report.notices.push(PlaybackNotice::Halted {
                turn_id: old.turn_id,
            });
        }
        self.active_turn = Some(turn_id);
        self.audible_turn = None;
    }

    fn start_next(&mut self, now: Instant, notices: &mut Vec<PlaybackNotice>) {
        while let Some(segment) = self.pending.pop_front() {
            let playback_id = self.next_playback_id;
            self.next_playback_id += 1;
            let handle = SegmentHandle::new(playback_id, self.sink_tx.clone());
            if let Err(e) = self.sink.start(&segment, handle) {
                warn!("turn {}: cannot start segment: {e}", segment.turn_id);
                continue;
            }
            let first_in_turn = self.audible_turn != Some(segment.turn_id);
            self.audible_turn = Some(segment.turn_id);
            self.sounding = Some(Sounding {
                playback_id,
                turn_id: segment.turn_id,
                started_at: now,
                estimated: segment.estimated_duration(),
            });
            notices.push(PlaybackNotice::SegmentStarted {
                turn_id: segment.turn_id,
                first_in_turn,
            });
            return;
        }
        if let Some(turn_id) = self.active_turn {
            notices.push(PlaybackNotice::Drained { turn_id });
        }
    }
}
