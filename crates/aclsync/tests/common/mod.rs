//! Shared test utilities for aclsync integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a manager to an in-memory store and a temp directory
//! - Declaration snippets used across scenarios

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::TestHarness;
