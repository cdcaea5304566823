//! Integration test binary: all integration tests consolidated into one
//! binary to keep link times down.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]


mod runtime_driver;
mod sync_scenarios;
