//! Turn-taking pipeline: turns, playback, barge-in and the session loop.

pub mod barge_in;
pub mod coordinator;
pub mod messages;
pub mod pause;
pub mod queue;
pub mod state;
pub mod turn;
