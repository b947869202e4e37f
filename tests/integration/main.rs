//! Integration test binary -- all session scenarios consolidated into a
//! single binary.
//!
//! See the matklad pattern: <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod helpers;

mod session_flow;
mod stale_turns;
