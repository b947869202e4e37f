//! Happy-path turns: utterance in, paced reply out.

use crate::helpers::{Harness, Mocks, Played, RecordingSink, Step, test_config};
use parley::{ControlEvent, RuntimeEvent, SessionPhase};
use std::time::Duration;

fn played(text: &str, pause_before_ms: u64, turn_id: u64) -> Played {
    Played {
        text: text.to_owned(),
        pause_before_ms,
        turn_id,
    }
}

#[tokio::test]
async fn reply_is_split_at_pauses_and_played_in_order() {
    let mocks = Mocks::new(200);
    mocks
        .reply
        .push(Step::Ok("Hi! [pause:0.5s] there [pause:1.2] friend".into()));
    let mut h = Harness::start(test_config(), mocks, RecordingSink::auto());

    h.mic.utterance(1_000).await;

    let started = h
        .expect_event("turn start", |e| matches!(e, RuntimeEvent::TurnStarted { .. }))
        .await;
    let RuntimeEvent::TurnStarted { turn_id, utterance } = started else {
        unreachable!()
    };
    assert_eq!(turn_id.get(), 1);
    assert!(utterance >= Duration::from_millis(1_000), "{utterance:?}");

    let reply = h
        .expect_event("reply", |e| matches!(e, RuntimeEvent::AssistantReply { .. }))
        .await;
    let RuntimeEvent::AssistantReply { text, .. } = reply else {
        unreachable!()
    };
    assert_eq!(text, "Hi! there friend", "display text has markers stripped");

    h.expect_event("completion", |e| {
        matches!(e, RuntimeEvent::TurnCompleted { turn_id } if turn_id.get() == 1)
    })
    .await;

    assert_eq!(
        h.sink.played(),
        vec![
            played("Hi!", 0, 1),
            played("there", 500, 1),
            played("friend", 1_200, 1),
        ]
    );
    let synthesized: Vec<String> = h
        .mocks
        .synthesis
        .calls()
        .into_iter()
        .map(|(text, _)| text)
        .collect();
    assert_eq!(synthesized, vec!["Hi!", "there", "friend"]);
    assert_eq!(h.mocks.reply.calls(), vec![("hello".to_owned(), 1)]);

    let state = h
        .expect_state("neutral after completion", |s| {
            s.phase == SessionPhase::Listening && !s.is_agent_speaking
        })
        .await;
    assert!(state.is_recording);
    assert!(!state.is_processing);
    assert_eq!(state.current_turn_id, None);
    assert_eq!(h.turns.current(), None);

    let events = h.drain_events();
    let starts = events
        .iter()
        .filter(|e| matches!(e, RuntimeEvent::Control(ControlEvent::AssistantSpeechStart { .. })))
        .count();
    let ends: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::Control(ControlEvent::AssistantSpeechEnd { interrupted, .. }) => {
                Some(*interrupted)
            }
            _ => None,
        })
        .collect();
    assert_eq!(starts, 1, "one speech start per turn, not per segment");
    assert_eq!(ends, vec![false]);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn pause_only_segments_play_without_synthesis() {
    let mocks = Mocks::new(100);
    mocks
        .reply
        .push(Step::Ok("One. [pause:1][pause:2] Two. [pause:0.5]".into()));
    let mut h = Harness::start(test_config(), mocks, RecordingSink::auto());

    h.mic.utterance(1_000).await;
    h.expect_event("completion", |e| matches!(e, RuntimeEvent::TurnCompleted { .. }))
        .await;

    assert_eq!(
        h.sink.played(),
        vec![
            played("One.", 0, 1),
            played("", 1_000, 1),
            played("Two.", 2_000, 1),
            played("", 500, 1),
        ]
    );
    assert_eq!(h.mocks.synthesis.calls().len(), 2);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn phases_follow_the_turn() {
    let mocks = Mocks::new(100);
    mocks
        .transcription
        .push(Step::Delay(Duration::from_millis(100), "hello".into()));
    mocks
        .reply
        .push(Step::Delay(Duration::from_millis(100), "Sure.".into()));
    let sink = RecordingSink::manual();
    let mut h = Harness::start(test_config(), mocks, sink);

    h.mic.utterance(1_000).await;

    h.expect_state("transcribing", |s| s.phase == SessionPhase::Transcribing)
        .await;
    let state = h
        .expect_state("generating reply", |s| s.phase == SessionPhase::GeneratingReply)
        .await;
    assert!(state.is_processing);
    assert_eq!(state.current_turn_id.map(|t| t.get()), Some(1));

    let state = h
        .expect_state("playing", |s| s.phase == SessionPhase::Playing)
        .await;
    assert!(state.is_agent_speaking);
    assert!(
        state.suppress_until.is_some(),
        "detector is suppressed while the assistant talks"
    );

    assert!(h.sink.finish_current());
    h.expect_state("listening", |s| s.phase == SessionPhase::Listening)
        .await;

    h.stop().await.unwrap();
}

#[tokio::test]
async fn consecutive_turns_get_increasing_ids() {
    let mocks = Mocks::new(100);
    let mut h = Harness::start(test_config(), mocks, RecordingSink::auto());

    for expected in 1..=3u64 {
        h.mic.utterance(1_000).await;
        h.expect_event("completion", |e| {
            matches!(e, RuntimeEvent::TurnCompleted { turn_id } if turn_id.get() == expected)
        })
        .await;
        // Let the post-playback suppression tail pass before speaking again.
        h.mic.silence(600).await;
    }

    assert_eq!(h.mocks.transcription.calls(), vec![1, 2, 3]);
    assert_eq!(h.turns.last_minted().map(|t| t.get()), Some(3));

    h.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_returns_to_idle() {
    let mocks = Mocks::new(100);
    let mut h = Harness::start(test_config(), mocks, RecordingSink::auto());
    h.expect_state("recording", |s| s.is_recording).await;

    let mut state = h.state.clone();
    h.stop().await.unwrap();

    let last = state.borrow_and_update().clone();
    assert!(!last.is_recording);
    assert_eq!(last.phase, SessionPhase::Idle);
}

#[tokio::test]
async fn flush_ends_the_utterance_without_waiting_for_silence() {
    let mocks = Mocks::new(100);
    let mut h = Harness::start(test_config(), mocks, RecordingSink::auto());

    // Nothing to close yet.
    h.flush.flush();
    let events = h.settle(100).await;
    assert!(!events.iter().any(|e| matches!(
        e,
        RuntimeEvent::TurnStarted { .. } | RuntimeEvent::UtteranceDiscarded { .. }
    )));

    // Frame time runs about a second ahead of the wall clock here, so the
    // silence gap alone would not close the utterance for over a second.
    h.mic.speech(1_000).await;
    h.settle(100).await;
    h.flush.flush();

    let started = tokio::time::timeout(
        Duration::from_millis(500),
        h.expect_event("turn start", |e| matches!(e, RuntimeEvent::TurnStarted { .. })),
    )
    .await
    .expect("flush should seal the utterance at once");
    let RuntimeEvent::TurnStarted { turn_id, utterance } = started else {
        unreachable!()
    };
    assert_eq!(turn_id.get(), 1);
    assert!(utterance >= Duration::from_millis(1_000), "{utterance:?}");

    h.expect_event("completion", |e| {
        matches!(e, RuntimeEvent::TurnCompleted { turn_id } if turn_id.get() == 1)
    })
    .await;
    assert_eq!(h.mocks.transcription.calls(), vec![1]);

    h.stop().await.unwrap();
}
