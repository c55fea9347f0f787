//! Orchestrator: drives one repair run end to end
//!
//! The orchestrator is the only decision point. It executes the actions
//! the [`RetryController`] hands back, one at a time, and turns each
//! collaborator result into the next event. Nothing here runs in parallel
//! except the audit fan-out.

use chrono::Utc;
use refix_core::fail_open::fail_open;
use refix_core::{
    AuditSummary, CorrectionInput, CorrectionReport, CorrectionStats, ExecutionState,
    RefixConfig, RefixError, Result, RunReport, StopReason, TestOutcome,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{ConcurrentAnalysisCoordinator, DEFAULT_MAX_WORKERS};
use crate::collaborators::{
    ArtifactStore, CorrectiveActionGenerator, DynamicValidator, StaticAnalyzer, TelemetryLog,
};
use crate::controller::{RetryController, RetryPolicy};
use crate::state_machine::{Action, Event};
use crate::telemetry::{ActionCategory, RecordStatus, TelemetryRecord};
use crate::translator::FailureTranslator;

const ORCHESTRATOR_ACTOR: &str = "orchestrator";

/// Run settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub policy: RetryPolicy,
    /// Audit worker pool size
    pub max_workers: usize,
    /// Audit one artifact at a time
    pub sequential: bool,
    /// Per-artifact analyzer budget
    pub analyzer_timeout: Duration,
    pub validator_timeout: Duration,
    pub corrector_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            sequential: false,
            analyzer_timeout: Duration::from_secs(60),
            validator_timeout: Duration::from_secs(60),
            corrector_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&RefixConfig> for RunConfig {
    fn from(config: &RefixConfig) -> Self {
        Self {
            policy: RetryPolicy::from(&config.loop_limits),
            max_workers: config.audit.max_workers.max(1),
            sequential: false,
            analyzer_timeout: Duration::from_secs(config.timeouts.analyzer_secs),
            validator_timeout: Duration::from_secs(config.timeouts.validator_secs),
            corrector_timeout: Duration::from_secs(config.timeouts.corrector_secs),
        }
    }
}

/// Handles to every collaborator a run needs
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ArtifactStore>,
    pub analyzer: Arc<dyn StaticAnalyzer>,
    pub validator: Arc<dyn DynamicValidator>,
    pub corrector: Arc<dyn CorrectiveActionGenerator>,
    pub telemetry: Arc<dyn TelemetryLog>,
}

/// What a phase produced
enum PhaseResult {
    Event(Event),
    Tested(TestOutcome, CorrectionReport),
}

/// Check that the target exists and is a directory
pub fn validate_target(target: &Path) -> Result<()> {
    if !target.exists() {
        return Err(RefixError::Validation(format!(
            "Target directory does not exist: {}",
            target.display()
        )));
    }
    if !target.is_dir() {
        return Err(RefixError::Validation(format!(
            "Target is not a directory: {}",
            target.display()
        )));
    }
    Ok(())
}

/// Drives the audit → fix → judge loop over one target directory
pub struct Orchestrator {
    target: PathBuf,
    config: RunConfig,
    collaborators: Collaborators,
}

impl Orchestrator {
    pub fn new(target: impl Into<PathBuf>, config: RunConfig, collaborators: Collaborators) -> Self {
        Self {
            target: target.into(),
            config,
            collaborators,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run until a terminal state
    ///
    /// Never returns an error: every failure ends in the ERROR state with
    /// its cause recorded in the report.
    pub async fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut controller = RetryController::new(self.config.policy);
        let mut audit: Option<AuditSummary> = None;
        let mut final_outcome: Option<TestOutcome> = None;

        info!("Run {} started on {}", run_id, self.target.display());
        self.record(TelemetryRecord::new(
            ORCHESTRATOR_ACTOR,
            ActionCategory::Debug,
            format!("repair run {} on {}", run_id, self.target.display()),
            format!(
                "max_iterations={}, no_progress_window={}",
                self.config.policy.max_iterations, self.config.policy.no_progress_window
            ),
            RecordStatus::Success,
        ))
        .await;

        let first = match validate_target(&self.target) {
            Ok(()) => controller.handle(Event::Start),
            Err(e) => {
                warn!("{}", e);
                controller.fail(e.to_string())
            }
        };
        let mut pending: VecDeque<Action> = first.into();

        while let Some(action) = pending.pop_front() {
            let result = match action {
                Action::LogActivity { message } => {
                    info!("{}", message);
                    continue;
                }
                Action::Finish { .. } => continue,
                Action::RunAudit => self.audit_phase(&mut audit).await,
                Action::ApplyCorrections { input } => {
                    info!(
                        "=== Iteration {} of {} ===",
                        controller.iteration(),
                        self.config.policy.max_iterations
                    );
                    self.correction_phase(&input, controller.iteration()).await
                }
                Action::RunValidator => self.validation_phase().await,
            };

            let actions = match result {
                PhaseResult::Event(event) => controller.handle(event),
                PhaseResult::Tested(outcome, report) => {
                    let actions = controller.judge(&outcome, report);
                    final_outcome = Some(outcome);
                    actions
                }
            };
            pending.extend(actions);
        }

        let state = controller.state();
        let stop_reason = controller.stop_reason().cloned().unwrap_or(StopReason::Failed {
            message: "run ended without reaching a terminal state".to_string(),
        });
        let state = if state.is_terminal() {
            state
        } else {
            ExecutionState::Error
        };

        let report = RunReport {
            run_id,
            target: self.target.clone(),
            state,
            stop_reason,
            iterations: controller.iteration(),
            max_iterations: self.config.policy.max_iterations,
            history: controller.into_history(),
            audit,
            final_outcome,
            started_at,
            finished_at: Utc::now(),
        };

        info!("Run {} finished: {}", run_id, report.cause());
        self.record(TelemetryRecord::new(
            ORCHESTRATOR_ACTOR,
            ActionCategory::Debug,
            format!("finish run {}", run_id),
            format!("{} after {} iteration(s)", report.cause(), report.iterations),
            RecordStatus::from(report.state == ExecutionState::Success),
        ))
        .await;
        fail_open("telemetry::flush", self.collaborators.telemetry.flush()).await;

        report
    }

    async fn audit_phase(&self, audit: &mut Option<AuditSummary>) -> PhaseResult {
        let coordinator = ConcurrentAnalysisCoordinator::new(
            Arc::clone(&self.collaborators.store),
            Arc::clone(&self.collaborators.analyzer),
        )
        .with_timeout(self.config.analyzer_timeout);

        let result = if self.config.sequential {
            coordinator.audit_sequential().await
        } else {
            coordinator.audit(self.config.max_workers).await
        };

        match result {
            Ok(summary) => {
                self.record(TelemetryRecord::new(
                    self.collaborators.analyzer.name(),
                    ActionCategory::CodeAnalysis,
                    format!("audit {}", self.target.display()),
                    format!(
                        "{} artifacts, {} issues, {} with errors, average score {:.2}",
                        summary.files_audited,
                        summary.total_issues,
                        summary.files_with_errors,
                        summary.average_score()
                    ),
                    RecordStatus::Success,
                ))
                .await;
                *audit = Some(summary.clone());
                PhaseResult::Event(Event::AuditComplete { summary })
            }
            Err(e) => {
                let message = format!("Audit failed: {}", e);
                self.record(TelemetryRecord::new(
                    self.collaborators.analyzer.name(),
                    ActionCategory::CodeAnalysis,
                    format!("audit {}", self.target.display()),
                    message.clone(),
                    RecordStatus::Failure,
                ))
                .await;
                PhaseResult::Event(Event::Failure { message })
            }
        }
    }

    async fn correction_phase(&self, input: &CorrectionInput, iteration: usize) -> PhaseResult {
        let corrector = &self.collaborators.corrector;
        let request = format!(
            "iteration {}: {} with {} issue(s)",
            iteration,
            input.label(),
            input.issue_count()
        );

        let timeout = self.config.corrector_timeout;
        let result = match tokio::time::timeout(timeout, corrector.apply(&self.target, input)).await {
            Ok(result) => result,
            Err(_) => Err(RefixError::timeout(corrector.name(), timeout.as_secs())),
        };

        match result {
            Ok(stats) => {
                self.record(TelemetryRecord::new(
                    corrector.name(),
                    ActionCategory::Fix,
                    request,
                    format!(
                        "{} correction(s) across {} artifact(s)",
                        stats.total_corrections, stats.artifacts_changed
                    ),
                    RecordStatus::from(stats.made_changes()),
                ))
                .await;
                PhaseResult::Event(Event::CorrectionsApplied { stats })
            }
            Err(e @ RefixError::Timeout { .. }) => {
                warn!("Corrective stage gave no result: {}", e);
                self.record(TelemetryRecord::new(
                    corrector.name(),
                    ActionCategory::Fix,
                    request,
                    e.to_string(),
                    RecordStatus::Failure,
                ))
                .await;
                PhaseResult::Event(Event::CorrectionsApplied {
                    stats: CorrectionStats::none(),
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.record(TelemetryRecord::new(
                    corrector.name(),
                    ActionCategory::Fix,
                    request,
                    message.clone(),
                    RecordStatus::Failure,
                ))
                .await;
                PhaseResult::Event(Event::Failure { message })
            }
        }
    }

    async fn validation_phase(&self) -> PhaseResult {
        let validator = &self.collaborators.validator;
        let timeout = self.config.validator_timeout;
        let request = format!("run tests in {}", self.target.display());

        let result = match tokio::time::timeout(timeout, validator.run(&self.target, None)).await {
            Ok(Err(RefixError::Timeout { secs, .. })) => Ok(TestOutcome::timed_out(secs)),
            Ok(result) => result,
            Err(_) => {
                warn!("{} exceeded {}s", validator.name(), timeout.as_secs());
                Ok(TestOutcome::timed_out(timeout.as_secs()))
            }
        };

        match result {
            Ok(outcome) => {
                let report = self.translator().await.translate(&outcome);
                self.record(TelemetryRecord::new(
                    validator.name(),
                    ActionCategory::Debug,
                    request,
                    format!(
                        "{} passed, {} failed, {} errors; {} issue(s) for {} artifact(s)",
                        outcome.passed,
                        outcome.failed,
                        outcome.errors,
                        report.issue_count(),
                        report.artifact_count()
                    ),
                    RecordStatus::from(!outcome.has_failures()),
                ))
                .await;
                PhaseResult::Tested(outcome, report)
            }
            Err(e) => {
                let message = e.to_string();
                self.record(TelemetryRecord::new(
                    validator.name(),
                    ActionCategory::Debug,
                    request,
                    message.clone(),
                    RecordStatus::Failure,
                ))
                .await;
                PhaseResult::Event(Event::Failure { message })
            }
        }
    }

    /// Translator bound to the artifacts currently in the store
    async fn translator(&self) -> FailureTranslator {
        match self.collaborators.store.list().await {
            Ok(names) => FailureTranslator::with_known_artifacts(names),
            Err(e) => {
                warn!("Could not list artifacts, mapping by name only: {}", e);
                FailureTranslator::new()
            }
        }
    }

    async fn record(&self, record: TelemetryRecord) {
        fail_open(
            "telemetry::append",
            self.collaborators.telemetry.append(record),
        )
        .await;
    }
}
