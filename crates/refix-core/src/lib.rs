//! # refix-core
//!
//! Core types for the refix repair loop.
//!
//! A run analyzes a directory of source artifacts once, then alternates
//! corrective rounds and test runs until the tests pass, the iteration
//! ceiling is hit, or the loop stops making progress.
//!
//! ## Contents
//!
//! - Phase records: [`AuditSummary`], [`TestOutcome`], [`CorrectionReport`]
//! - Run state: [`ExecutionState`], [`StopReason`], [`IterationRecord`], [`RunReport`]
//! - [`RefixError`] and the crate-wide [`Result`]
//! - [`config::RefixConfig`], loaded from `.refix/config.toml`

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::RefixConfig;
pub use error::{RefixError, Result};
pub use types::*;
