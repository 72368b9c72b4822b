//! Main entry point for integration tests
//!
//! This file includes all integration test modules.
//! Run with: `cargo test --test tracking_tests`

mod tracking;
