//! Results for superseded turns are dropped on arrival.

use crate::helpers::{Harness, Mocks, Played, RecordingSink, Step, test_config};
use parley::{ControlEvent, RuntimeEvent, SessionPhase};
use std::time::Duration;

#[tokio::test]
async fn slow_transcription_of_superseded_turn_is_ignored() {
    let mocks = Mocks::new(100);
    mocks
        .transcription
        .push(Step::Delay(Duration::from_millis(600), "first".into()));
    mocks.transcription.push(Step::Ok("second".into()));
    let mut h = Harness::start(test_config(), mocks, RecordingSink::auto());

    h.mic.utterance(1_000).await;
    h.expect_event("turn 1", |e| {
        matches!(e, RuntimeEvent::TurnStarted { turn_id, .. } if turn_id.get() == 1)
    })
    .await;

    // The user keeps talking before turn 1 is transcribed.
    h.mic.utterance(1_000).await;
    h.expect_event("turn 2 completes", |e| {
        matches!(e, RuntimeEvent::TurnCompleted { turn_id } if turn_id.get() == 2)
    })
    .await;

    // Give turn 1's transcription time to land.
    let events = h.settle(800).await;
    assert!(
        !events.iter().any(|e| matches!(
            e,
            RuntimeEvent::Transcription { turn_id, .. } if turn_id.get() == 1
        )),
        "stale transcription must not surface"
    );

    assert_eq!(h.mocks.transcription.calls(), vec![1, 2]);
    assert_eq!(h.mocks.reply.calls(), vec![("second".to_owned(), 2)]);
    assert!(h.sink.played().iter().all(|p| p.turn_id == 2));

    let state = h.state.borrow().clone();
    assert!(state.current_turn_id.is_none());
    assert!(!state.is_processing);
    assert!(!state.is_agent_speaking);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn slow_reply_of_superseded_turn_never_plays() {
    let mocks = Mocks::new(100);
    mocks.transcription.push(Step::Ok("first".into()));
    mocks.transcription.push(Step::Ok("second".into()));
    mocks
        .reply
        .push(Step::Delay(Duration::from_millis(500), "Old answer.".into()));
    mocks.reply.push(Step::Ok("New answer.".into()));
    let mut h = Harness::start(test_config(), mocks, RecordingSink::auto());

    h.mic.utterance(1_000).await;
    h.expect_event("turn 1 transcribed", |e| {
        matches!(e, RuntimeEvent::Transcription { turn_id, .. } if turn_id.get() == 1)
    })
    .await;

    h.mic.utterance(1_000).await;
    h.expect_event("turn 2 completes", |e| {
        matches!(e, RuntimeEvent::TurnCompleted { turn_id } if turn_id.get() == 2)
    })
    .await;
    h.settle(700).await;

    assert_eq!(h.sink.played_texts(), vec!["New answer."]);
    assert!(
        h.mocks
            .synthesis
            .calls()
            .iter()
            .all(|(_, turn)| *turn == 2),
        "nothing is synthesized for a superseded turn"
    );
    assert!(!h.seen.iter().any(|e| matches!(
        e,
        RuntimeEvent::AssistantReply { turn_id, .. } if turn_id.get() == 1
    )));

    h.stop().await.unwrap();
}

#[tokio::test]
async fn new_utterance_cuts_off_playback_of_the_previous_turn() {
    let mocks = Mocks::new(2_000);
    mocks.transcription.push(Step::Ok("first".into()));
    mocks
        .transcription
        .push(Step::Delay(Duration::from_secs(3), "second".into()));
    mocks.reply.push(Step::Delay(
        Duration::from_millis(400),
        "One. [pause:0.1] Two.".into(),
    ));
    let mut h = Harness::start(test_config(), mocks, RecordingSink::manual());

    h.mic.utterance(1_000).await;
    h.expect_event("turn 1 transcribed", |e| {
        matches!(e, RuntimeEvent::Transcription { turn_id, .. } if turn_id.get() == 1)
    })
    .await;

    // The user starts talking while the reply is being generated...
    h.mic.speech(1_000).await;
    h.expect_event("turn 1 audible", |e| {
        matches!(
            e,
            RuntimeEvent::Control(ControlEvent::AssistantSpeechStart { turn_id })
                if turn_id.get() == 1
        )
    })
    .await;
    let playing = h.expect_state("speaking", |s| s.is_agent_speaking).await;
    assert!(
        playing.suppress_until.is_some(),
        "assistant audio is always covered by suppression: {playing:?}"
    );

    // ...and stops while it plays.
    h.mic.silence(600).await;
    h.expect_event("turn 2", |e| {
        matches!(e, RuntimeEvent::TurnStarted { turn_id, .. } if turn_id.get() == 2)
    })
    .await;

    let state = h
        .expect_state("turn 2 transcribing", |s| {
            s.current_turn_id.is_some_and(|t| t.get() == 2)
        })
        .await;
    assert!(!state.is_agent_speaking);
    assert!(state.is_processing);
    assert_eq!(state.phase, SessionPhase::Transcribing);

    assert_eq!(h.sink.halts(), 1);
    assert!(!h.sink.finish_current(), "nothing of turn 1 is left sounding");
    assert_eq!(
        h.sink.played(),
        vec![Played {
            text: "One.".into(),
            pause_before_ms: 0,
            turn_id: 1,
        }]
    );

    // Late callbacks for turn 1 must not disturb turn 2.
    let events = h.settle(300).await;
    assert!(events.iter().any(|e| matches!(
        e,
        RuntimeEvent::Control(ControlEvent::AssistantSpeechEnd { turn_id, interrupted: true })
            if turn_id.get() == 1
    )));
    assert!(!events.iter().any(|e| matches!(
        e,
        RuntimeEvent::TurnCompleted { turn_id } if turn_id.get() == 1
    )));
    let state = h.state.borrow().clone();
    assert_eq!(state.current_turn_id.map(|t| t.get()), Some(2));
    assert!(state.is_processing);
    assert!(!state.is_agent_speaking);
    assert_eq!(state.phase, SessionPhase::Transcribing);
    assert_eq!(h.sink.played_texts(), vec!["One."]);

    h.stop().await.unwrap();
}
