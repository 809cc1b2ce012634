//! Common test utilities and fixtures for integration tests.
//!
//! # Modules
//!
//! - `fixtures`: mock provider servers and orchestrator builders
//! - `logger`: Structured test logging infrastructure

pub mod fixtures;
pub mod logger;
