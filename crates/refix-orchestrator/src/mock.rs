//! In-memory collaborators for tests
//!
//! Each mock is scripted up front and counts its calls, so tests can drive
//! the loop through any path without spawning processes.

use async_trait::async_trait;
use refix_core::{CorrectionInput, CorrectionStats, RefixError, Result, TestOutcome};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::collaborators::{
    AnalyzerReport, CorrectiveActionGenerator, DynamicValidator, StaticAnalyzer, TelemetryLog,
};
use crate::telemetry::TelemetryRecord;

/// Scripted failure for a mock call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    PermissionDenied,
    /// Collaborator-level error with a message
    Analyzer(String),
    /// Never completes; relies on the caller's timeout
    Hang,
    Panic,
}

impl MockFailure {
    async fn raise<T>(&self, context: &str) -> Result<T> {
        match self {
            Self::NotFound => Err(RefixError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", context),
            ))),
            Self::PermissionDenied => Err(RefixError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{}: permission denied", context),
            ))),
            Self::Analyzer(message) => Err(RefixError::Analyzer(message.clone())),
            Self::Hang => std::future::pending().await,
            Self::Panic => panic!("mock panic for {}", context),
        }
    }
}

/// Static analyzer answering by artifact file name
///
/// Unknown names get a clean report with a score of 10.
#[derive(Debug, Default)]
pub struct MapAnalyzer {
    reports: HashMap<String, AnalyzerReport>,
    failures: HashMap<String, MockFailure>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MapAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, file_name: &str, report: AnalyzerReport) -> Self {
        self.reports.insert(file_name.to_string(), report);
        self
    }

    pub fn with_failure(mut self, file_name: &str, failure: MockFailure) -> Self {
        self.failures.insert(file_name.to_string(), failure);
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `analyze` calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StaticAnalyzer for MapAnalyzer {
    async fn analyze(&self, artifact: &Path) -> Result<AnalyzerReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let key = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let result = match self.failures.get(&key) {
            Some(failure) => failure.raise(&key).await,
            None => Ok(self.reports.get(&key).cloned().unwrap_or(AnalyzerReport {
                score: 10.0,
                messages: Vec::new(),
            })),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "mock-analyzer"
    }
}

/// One scripted validator response
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatorStep {
    Outcome(TestOutcome),
    Fail(String),
    Hang,
}

/// Validator replaying a script; the last step repeats once the script runs out
#[derive(Debug)]
pub struct ScriptedValidator {
    steps: Mutex<VecDeque<ValidatorStep>>,
    last: Mutex<Option<ValidatorStep>>,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    pub fn new(steps: impl IntoIterator<Item = ValidatorStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Validator returning each outcome in turn
    pub fn outcomes(outcomes: impl IntoIterator<Item = TestOutcome>) -> Self {
        Self::new(outcomes.into_iter().map(ValidatorStep::Outcome))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DynamicValidator for ScriptedValidator {
    async fn run(&self, _directory: &Path, _single: Option<&str>) -> Result<TestOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let step = match self.steps.lock().await.pop_front() {
            Some(step) => {
                *self.last.lock().await = Some(step.clone());
                step
            }
            None => self
                .last
                .lock()
                .await
                .clone()
                .unwrap_or(ValidatorStep::Outcome(TestOutcome::passing(0))),
        };

        match step {
            ValidatorStep::Outcome(outcome) => Ok(outcome),
            ValidatorStep::Fail(message) => Err(RefixError::Validator(message)),
            ValidatorStep::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "mock-validator"
    }
}

/// One scripted corrector response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectorStep {
    Stats(CorrectionStats),
    Fail(String),
    Hang,
}

/// Corrective stage replaying a script and recording every input
///
/// Without a script it reports one correction per call.
#[derive(Debug)]
pub struct ScriptedCorrector {
    steps: Mutex<VecDeque<CorrectorStep>>,
    inputs: Mutex<Vec<CorrectionInput>>,
    calls: AtomicUsize,
}

impl ScriptedCorrector {
    pub fn new(steps: impl IntoIterator<Item = CorrectorStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            inputs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Corrector that always reports one change
    pub fn always_changes() -> Self {
        Self::new([])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs received so far, in call order
    pub async fn inputs(&self) -> Vec<CorrectionInput> {
        self.inputs.lock().await.clone()
    }
}

#[async_trait]
impl CorrectiveActionGenerator for ScriptedCorrector {
    async fn apply(&self, _directory: &Path, input: &CorrectionInput) -> Result<CorrectionStats> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().await.push(input.clone());

        let step = self
            .steps
            .lock()
            .await
            .pop_front()
            .unwrap_or(CorrectorStep::Stats(CorrectionStats {
                artifacts_changed: 1,
                total_corrections: 1,
            }));

        match step {
            CorrectorStep::Stats(stats) => Ok(stats),
            CorrectorStep::Fail(message) => Err(RefixError::Corrector(message)),
            CorrectorStep::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "mock-corrector"
    }
}

/// Telemetry sink keeping records in memory
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    records: Mutex<Vec<TelemetryRecord>>,
    failing: AtomicBool,
    flushes: AtomicUsize,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every append and flush fails
    pub fn failing() -> Self {
        let telemetry = Self::default();
        telemetry.failing.store(true, Ordering::SeqCst);
        telemetry
    }

    pub async fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().await.clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetryLog for MemoryTelemetry {
    async fn append(&self, record: TelemetryRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RefixError::Telemetry("sink unavailable".to_string()));
        }
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RefixError::Telemetry("sink unavailable".to_string()));
        }
        Ok(())
    }
}

/// Failing pytest-style outcome with one marker line per failure
///
/// Test ids are `test_case_0..failed`, each with a distinct assertion.
pub fn failing_outcome(test_file: &str, failed: usize) -> TestOutcome {
    let mut lines: Vec<String> = (0..failed)
        .map(|i| format!("FAILED {}::test_case_{} - assert {} == {}", test_file, i, i, i + 1))
        .collect();
    lines.push(format!("========== {} failed, 1 passed in 0.10s ==========", failed));
    TestOutcome {
        passed: 1,
        failed,
        errors: 0,
        lines,
        success: false,
    }
}
