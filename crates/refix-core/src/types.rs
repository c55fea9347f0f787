//! Core type definitions for the refix repair loop
//!
//! Every phase hands the next one a closed, typed record:
//! - [`AuditSummary`] from the static analysis pass
//! - [`TestOutcome`] from each dynamic validation run
//! - [`CorrectionReport`] translated from a failing [`TestOutcome`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Issue category tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Structural,
    Style,
    Logic,
    Error,
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structural => write!(f, "structural"),
            Self::Style => write!(f, "style"),
            Self::Logic => write!(f, "logic"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A single detected problem in an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<IssueCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl Issue {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: None,
            severity: None,
        }
    }

    pub fn with_category(mut self, category: IssueCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Classify an analyzer message by its message id
    ///
    /// Understands the `path:line:col: C0114: text` shape; the id letter picks
    /// the category and severity. Anything else becomes an untagged issue.
    pub fn from_analyzer_message(message: &str) -> Self {
        let message = message.trim();
        let code = message
            .split(": ")
            .map(str::trim)
            .find(|part| is_message_id(part));

        let tags = code.and_then(|id| match id.chars().next() {
            Some('C') => Some((IssueCategory::Style, Severity::Info)),
            Some('I') => Some((IssueCategory::Style, Severity::Info)),
            Some('R') => Some((IssueCategory::Structural, Severity::Info)),
            Some('W') => Some((IssueCategory::Logic, Severity::Warning)),
            Some('E') => Some((IssueCategory::Error, Severity::Error)),
            Some('F') => Some((IssueCategory::Error, Severity::Fatal)),
            _ => None,
        });

        match tags {
            Some((category, severity)) => Self::new(message)
                .with_category(category)
                .with_severity(severity),
            None => Self::new(message),
        }
    }
}

fn is_message_id(part: &str) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some('C' | 'R' | 'W' | 'E' | 'F' | 'I'))
        && part.len() == 5
        && chars.all(|c| c.is_ascii_digit())
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.category, self.severity) {
            (Some(c), Some(s)) => write!(f, "[{}/{}] {}", c, s, self.description),
            (Some(c), None) => write!(f, "[{}] {}", c, self.description),
            (None, Some(s)) => write!(f, "[{}] {}", s, self.description),
            (None, None) => write!(f, "{}", self.description),
        }
    }
}

/// Static analysis result for one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisUnit {
    /// Artifact identity: `/`-separated path relative to the target directory
    pub name: String,
    /// Content snapshot taken at analysis time
    pub content: String,
    /// Analyzer score (0.0 - 10.0)
    pub score: f64,
    pub issues: Vec<Issue>,
}

impl AnalysisUnit {
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

/// Why a single artifact could not be analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactErrorKind {
    NotFound,
    PermissionDenied,
    Timeout,
    Analyzer,
    Unexpected,
}

impl std::fmt::Display for ArtifactErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Timeout => write!(f, "timeout"),
            Self::Analyzer => write!(f, "analyzer failure"),
            Self::Unexpected => write!(f, "unexpected error"),
        }
    }
}

/// Per-artifact analysis failure, recorded instead of aborting the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactError {
    pub kind: ArtifactErrorKind,
    pub message: String,
}

impl ArtifactError {
    pub fn new(kind: ArtifactErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of analyzing one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactOutcome {
    Analyzed(AnalysisUnit),
    Failed(ArtifactError),
}

impl ArtifactOutcome {
    pub fn unit(&self) -> Option<&AnalysisUnit> {
        match self {
            Self::Analyzed(unit) => Some(unit),
            Self::Failed(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Overall audit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Complete,
    /// The target directory holds no artifacts; not an error
    NoArtifacts,
}

/// Aggregate of one static analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub status: AuditStatus,
    pub files_audited: usize,
    pub total_issues: usize,
    pub files_with_errors: usize,
    pub results: BTreeMap<String, ArtifactOutcome>,
}

impl AuditSummary {
    /// Summary for a directory without artifacts
    pub fn empty() -> Self {
        Self {
            status: AuditStatus::NoArtifacts,
            files_audited: 0,
            total_issues: 0,
            files_with_errors: 0,
            results: BTreeMap::new(),
        }
    }

    /// Aggregate per-artifact outcomes
    ///
    /// Issue counts only include analyzed artifacts; failed ones only count
    /// towards `files_with_errors`.
    pub fn from_outcomes(results: BTreeMap<String, ArtifactOutcome>) -> Self {
        if results.is_empty() {
            return Self::empty();
        }

        let mut total_issues = 0;
        let mut files_with_errors = 0;
        for outcome in results.values() {
            match outcome {
                ArtifactOutcome::Analyzed(unit) => total_issues += unit.issue_count(),
                ArtifactOutcome::Failed(_) => files_with_errors += 1,
            }
        }

        Self {
            status: AuditStatus::Complete,
            files_audited: results.len(),
            total_issues,
            files_with_errors,
            results,
        }
    }

    /// All issues across analyzed artifacts, in artifact order
    pub fn all_issues(&self) -> Vec<&Issue> {
        self.results
            .values()
            .filter_map(ArtifactOutcome::unit)
            .flat_map(|unit| unit.issues.iter())
            .collect()
    }

    /// Analyzed artifacts sorted by issue count, most issues first
    pub fn files_by_issue_count(&self) -> Vec<(&str, usize)> {
        let mut files: Vec<(&str, usize)> = self
            .results
            .iter()
            .filter_map(|(name, outcome)| outcome.unit().map(|u| (name.as_str(), u.issue_count())))
            .collect();
        files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        files
    }

    /// Mean analyzer score over analyzed artifacts that reported one
    pub fn average_score(&self) -> f64 {
        let scores: Vec<f64> = self
            .results
            .values()
            .filter_map(ArtifactOutcome::unit)
            .map(|u| u.score)
            .filter(|s| *s > 0.0)
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    /// Names of artifacts whose analysis failed
    pub fn error_files(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, outcome)| outcome.is_error())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Result of one dynamic validation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    /// Raw validator output, one entry per line
    pub lines: Vec<String>,
    pub success: bool,
}

impl TestOutcome {
    /// Outcome with every test passing
    pub fn passing(passed: usize) -> Self {
        Self {
            passed,
            success: true,
            ..Default::default()
        }
    }

    /// Outcome recorded when the validator exceeded its time budget
    pub fn timed_out(secs: u64) -> Self {
        Self {
            errors: 1,
            lines: vec![format!("Validator timed out after {}s", secs)],
            ..Default::default()
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errors
    }

    /// True when anything failed or errored
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errors > 0
    }

    pub fn raw_output(&self) -> String {
        self.lines.join("\n")
    }
}

/// Per-artifact issues derived from a failing [`TestOutcome`]
///
/// An artifact is present only while it has at least one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub issues: BTreeMap<String, Vec<String>>,
}

impl CorrectionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an issue unless the artifact already carries the exact string
    ///
    /// Returns true when the issue was added.
    pub fn push(&mut self, artifact: impl Into<String>, issue: impl Into<String>) -> bool {
        let issue = issue.into();
        let entry = self.issues.entry(artifact.into()).or_default();
        if entry.contains(&issue) {
            false
        } else {
            entry.push(issue);
            true
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn artifact_count(&self) -> usize {
        self.issues.len()
    }

    pub fn issue_count(&self) -> usize {
        self.issues.values().map(Vec::len).sum()
    }

    pub fn get(&self, artifact: &str) -> Option<&[String]> {
        self.issues.get(artifact).map(Vec::as_slice)
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &str> {
        self.issues.keys().map(String::as_str)
    }
}

/// Counters reported back by the corrective stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionStats {
    pub artifacts_changed: usize,
    pub total_corrections: usize,
}

impl CorrectionStats {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn made_changes(&self) -> bool {
        self.total_corrections > 0
    }
}

/// What the corrective stage is asked to act on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "data", rename_all = "snake_case")]
pub enum CorrectionInput {
    /// First round: the static analysis summary
    Audit(AuditSummary),
    /// Later rounds: issues translated from the previous validation
    Report(CorrectionReport),
}

impl CorrectionInput {
    pub fn issue_count(&self) -> usize {
        match self {
            Self::Audit(summary) => summary.total_issues,
            Self::Report(report) => report.issue_count(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Audit(_) => "audit summary",
            Self::Report(_) => "correction report",
        }
    }
}

/// Execution state of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Init,
    Audit,
    Fix,
    Judge,
    Success,
    MaxIterations,
    Error,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::MaxIterations | Self::Error)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Audit => write!(f, "AUDIT"),
            Self::Fix => write!(f, "FIX"),
            Self::Judge => write!(f, "JUDGE"),
            Self::Success => write!(f, "SUCCESS"),
            Self::MaxIterations => write!(f, "MAX_ITERATIONS"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Why a run reached its terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Validation reported zero failures and zero errors
    Converged,
    /// The hard iteration ceiling was reached
    IterationCeiling { max: usize },
    /// Failed count did not strictly decrease within the progress window
    NoProgress { window: usize, failed: usize },
    /// The corrective stage applied nothing while failures remained
    Stalled { failed: usize },
    /// Failures remained but none could be attributed to an artifact
    ///
    /// A validator timeout ends here on its first round. The timed-out
    /// outcome carries no failure markers, so there is nothing to hand the
    /// corrective stage.
    Unactionable { failed: usize, errors: usize },
    /// A collaborator or input failure ended the run
    Failed { message: String },
}

impl StopReason {
    /// Terminal state this reason leads to
    pub fn terminal_state(&self) -> ExecutionState {
        match self {
            Self::Converged => ExecutionState::Success,
            Self::Failed { .. } => ExecutionState::Error,
            _ => ExecutionState::MaxIterations,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "all tests passed"),
            Self::IterationCeiling { max } => {
                write!(f, "iteration ceiling of {} reached", max)
            }
            Self::NoProgress { window, failed } => write!(
                f,
                "no progress: failed count stuck at {} across {} rounds",
                failed, window
            ),
            Self::Stalled { failed } => write!(
                f,
                "corrective stage applied no changes with {} failure(s) remaining",
                failed
            ),
            Self::Unactionable { failed, errors } => write!(
                f,
                "{} failed / {} errored test(s) could not be mapped to any artifact",
                failed, errors
            ),
            Self::Failed { message } => write!(f, "{}", message),
        }
    }
}

/// Phase output captured in the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PhaseSnapshot {
    Audit(AuditSummary),
    Corrections(CorrectionStats),
    Test(TestOutcome),
    Terminal(StopReason),
}

/// One entry of the append-only run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub state: ExecutionState,
    pub snapshot: PhaseSnapshot,
    pub recorded_at: DateTime<Utc>,
}

impl IterationRecord {
    pub fn new(iteration: usize, state: ExecutionState, snapshot: PhaseSnapshot) -> Self {
        Self {
            iteration,
            state,
            snapshot,
            recorded_at: Utc::now(),
        }
    }
}

/// Condensed view of a finished run's traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_iterations: usize,
    pub max_allowed_iterations: usize,
    pub max_reached: bool,
    pub steps: usize,
}

/// Final result of one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target: PathBuf,
    pub state: ExecutionState,
    pub stop_reason: StopReason,
    pub iterations: usize,
    pub max_iterations: usize,
    pub history: Vec<IterationRecord>,
    pub audit: Option<AuditSummary>,
    pub final_outcome: Option<TestOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Process exit code: 0 only for SUCCESS
    pub fn exit_code(&self) -> i32 {
        if self.state == ExecutionState::Success {
            0
        } else {
            1
        }
    }

    /// One-line printable cause for the terminal state
    pub fn cause(&self) -> String {
        format!("{}: {}", self.state, self.stop_reason)
    }

    pub fn execution_summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            total_iterations: self.iterations,
            max_allowed_iterations: self.max_iterations,
            max_reached: self.iterations >= self.max_iterations,
            steps: self.history.len(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
