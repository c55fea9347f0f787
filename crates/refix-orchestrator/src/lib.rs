//! # refix-orchestrator
//!
//! Bounded repair loop engine for refix.
//!
//! This crate provides:
//! - Concurrent static analysis over a directory of artifacts
//! - Translation of test failures into per-artifact correction input
//! - A pure state machine plus the retry policy that stops the loop
//! - The orchestrator that wires collaborators into a run
//! - Subprocess-backed collaborators (pytest, pylint, external corrector)

mod artifacts;
mod audit;
mod collaborators;
mod controller;
mod heuristic;
pub mod mock;
mod orchestrator;
mod progress;
mod runners;
mod state_machine;
mod telemetry;
mod translator;

pub use artifacts::{validate_artifact_name, FsArtifactStore};
pub use audit::{to_artifact_error, ConcurrentAnalysisCoordinator, DEFAULT_MAX_WORKERS};
pub use collaborators::{
    AnalyzerReport, ArtifactStore, CorrectiveActionGenerator, DynamicValidator, StaticAnalyzer,
    TelemetryLog,
};
pub use controller::{RetryController, RetryPolicy};
pub use heuristic::HeuristicAnalyzer;
pub use orchestrator::{validate_target, Collaborators, Orchestrator, RunConfig};
pub use progress::{ProgressState, ProgressTracker};
pub use runners::{
    parse_correction_stats, parse_pylint_output, parse_pytest_output, run_command,
    CommandCorrector, CommandOutput, PylintAnalyzer, PytestValidator, CORRECTION_INPUT_ENV,
};
pub use state_machine::{transition, Action, Event, Verdict};
pub use telemetry::{ActionCategory, JsonlTelemetryLog, RecordStatus, TelemetryRecord};
pub use translator::{production_artifact_for, translate, FailureTranslator};
