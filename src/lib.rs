//! persona-core - resilient multi-provider personality research
//!
//! Turns a free-text description into a validated personality descriptor by
//! orchestrating several LLM providers with health tracking, retries, cost
//! limits, a pluggable response cache and error recovery.
//!
//! The entry point for embedding is [`core::research::ResearchOrchestrator`];
//! the `persona` binary is a thin CLI over it.

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod providers;
pub mod storage;
pub mod util;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{ExitCode, PersonaError, Result};
