//! Collaborator contracts consumed by the repair loop
//!
//! Each trait is object-safe and `Send + Sync` so the orchestrator can hold
//! them as `Arc<dyn ...>` and the audit fan-out can share them across tasks.
//! Process-backed implementations live in [`crate::runners`], in-memory
//! doubles in [`crate::mock`].

use async_trait::async_trait;
use refix_core::{CorrectionInput, CorrectionStats, Result, TestOutcome};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::telemetry::TelemetryRecord;

/// Raw static analyzer output for one artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerReport {
    /// Analyzer score (0.0 - 10.0)
    pub score: f64,
    /// One entry per reported problem
    pub messages: Vec<String>,
}

/// Detects issues without executing the artifact
#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    /// Analyze a single artifact on disk
    async fn analyze(&self, artifact: &Path) -> Result<AnalyzerReport>;

    /// Short name used in logs and telemetry
    fn name(&self) -> &str;
}

/// Runs the tests associated with the artifacts
#[async_trait]
pub trait DynamicValidator: Send + Sync {
    /// Run the whole suite under `directory`, or only `single` when given
    async fn run(&self, directory: &Path, single: Option<&str>) -> Result<TestOutcome>;

    fn name(&self) -> &str;
}

/// Mutates artifacts on disk in response to issues
#[async_trait]
pub trait CorrectiveActionGenerator: Send + Sync {
    /// Apply corrections; only the returned counters are observed
    async fn apply(&self, directory: &Path, input: &CorrectionInput) -> Result<CorrectionStats>;

    fn name(&self) -> &str;
}

/// Write-only telemetry sink
#[async_trait]
pub trait TelemetryLog: Send + Sync {
    async fn append(&self, record: TelemetryRecord) -> Result<()>;

    /// Make every appended record durable
    async fn flush(&self) -> Result<()>;
}

/// Named artifacts inside a target directory
///
/// Names are `/`-separated paths relative to [`ArtifactStore::root`].
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn root(&self) -> &Path;

    /// All artifact names, sorted
    async fn list(&self) -> Result<Vec<String>>;

    async fn read(&self, name: &str) -> Result<String>;

    async fn write(&self, name: &str, content: &str) -> Result<()>;

    async fn exists(&self, name: &str) -> bool;

    /// Absolute path of an artifact, rejecting names that escape the root
    fn resolve(&self, name: &str) -> Result<PathBuf>;
}
