//! Retry controller: the stateful wrapper around [`transition`]
//!
//! Owns the current [`ExecutionState`], the iteration counter, the
//! no-progress breaker and the append-only history. The orchestrator feeds
//! it events and executes the actions it hands back.

use refix_core::config::LoopLimits;
use refix_core::{
    CorrectionReport, CorrectionStats, ExecutionState, IterationRecord, PhaseSnapshot, StopReason,
    TestOutcome,
};
use tracing::{debug, info};

use crate::progress::ProgressTracker;
use crate::state_machine::{transition, Action, Event, Verdict};

/// Limits that bound the fix/validate loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Hard ceiling on FIX transitions
    pub max_iterations: usize,
    /// Rounds allowed without a strict drop in failures
    pub no_progress_window: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            no_progress_window: 2,
        }
    }
}

impl From<&LoopLimits> for RetryPolicy {
    fn from(limits: &LoopLimits) -> Self {
        Self {
            max_iterations: limits.max_iterations.max(1),
            no_progress_window: limits.no_progress_window,
        }
    }
}

/// Drives one run's state machine and decides retry verdicts
#[derive(Debug)]
pub struct RetryController {
    policy: RetryPolicy,
    state: ExecutionState,
    iteration: usize,
    progress: ProgressTracker,
    last_stats: Option<CorrectionStats>,
    history: Vec<IterationRecord>,
    stop_reason: Option<StopReason>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        let policy = RetryPolicy {
            max_iterations: policy.max_iterations.max(1),
            ..policy
        };
        Self {
            policy,
            state: ExecutionState::Init,
            iteration: 0,
            progress: ProgressTracker::new(policy.no_progress_window),
            last_stats: None,
            history: Vec::new(),
            stop_reason: None,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Number of FIX transitions so far
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn into_history(self) -> Vec<IterationRecord> {
        self.history
    }

    /// Why the run stopped, once terminal
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply an event and return the actions to execute
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match &event {
            Event::AuditComplete { summary } if self.state == ExecutionState::Audit => {
                self.record(PhaseSnapshot::Audit(summary.clone()));
            }
            Event::CorrectionsApplied { stats } if self.state == ExecutionState::Fix => {
                self.last_stats = Some(*stats);
                self.record(PhaseSnapshot::Corrections(*stats));
            }
            _ => {}
        }

        let from = self.state;
        let (next, actions) = transition(from, event);
        if next == ExecutionState::Fix {
            self.iteration += 1;
            self.last_stats = None;
        }
        self.state = next;
        debug!("Transition {} -> {} (iteration {})", from, next, self.iteration);

        for action in &actions {
            if let Action::Finish { reason } = action {
                info!("Run finished in {}: {}", next, reason);
                self.stop_reason = Some(reason.clone());
                self.record(PhaseSnapshot::Terminal(reason.clone()));
            }
        }

        actions
    }

    /// Record a validation result, decide the verdict and apply it
    pub fn judge(&mut self, outcome: &TestOutcome, report: CorrectionReport) -> Vec<Action> {
        if self.state == ExecutionState::Judge {
            self.record(PhaseSnapshot::Test(outcome.clone()));
        }
        let verdict = self.verdict(outcome, &report);
        self.handle(Event::Judged { verdict, report })
    }

    /// Shortcut for a failure event
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<Action> {
        self.handle(Event::Failure {
            message: message.into(),
        })
    }

    /// Retry policy, evaluated in a fixed order
    fn verdict(&mut self, outcome: &TestOutcome, report: &CorrectionReport) -> Verdict {
        if !outcome.has_failures() {
            return Verdict::Converged;
        }

        self.progress.record(outcome.failed);

        let corrections = self.last_stats.unwrap_or_default();
        if !corrections.made_changes() {
            return Verdict::Exhausted(StopReason::Stalled {
                failed: outcome.failed,
            });
        }

        if report.is_empty() {
            return Verdict::Exhausted(StopReason::Unactionable {
                failed: outcome.failed,
                errors: outcome.errors,
            });
        }

        if self.iteration >= self.policy.max_iterations {
            return Verdict::Exhausted(StopReason::IterationCeiling {
                max: self.policy.max_iterations,
            });
        }

        if self.progress.is_tripped() {
            return Verdict::Exhausted(StopReason::NoProgress {
                window: self.progress.window(),
                failed: outcome.failed,
            });
        }

        Verdict::Retry
    }

    fn record(&mut self, snapshot: PhaseSnapshot) {
        self.history
            .push(IterationRecord::new(self.iteration, self.state, snapshot));
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refix_core::AuditSummary;

    fn failing(failed: usize) -> TestOutcome {
        TestOutcome {
            passed: 1,
            failed,
            errors: 0,
            lines: Vec::new(),
            success: false,
        }
    }

    fn report() -> CorrectionReport {
        let mut report = CorrectionReport::new();
        report.push("calc.py", "test_add failed - check logic");
        report
    }

    fn changed() -> CorrectionStats {
        CorrectionStats {
            artifacts_changed: 1,
            total_corrections: 1,
        }
    }

    /// Drive the controller to its first JUDGE
    fn to_judge(controller: &mut RetryController) {
        controller.handle(Event::Start);
        controller.handle(Event::AuditComplete {
            summary: AuditSummary::empty(),
        });
        controller.handle(Event::CorrectionsApplied { stats: changed() });
        assert_eq!(controller.state(), ExecutionState::Judge);
    }

    fn round(controller: &mut RetryController, failed: usize) {
        if failed == 0 {
            controller.judge(&TestOutcome::passing(3), CorrectionReport::new());
        } else {
            controller.judge(&failing(failed), report());
        }
        if controller.state() == ExecutionState::Fix {
            controller.handle(Event::CorrectionsApplied { stats: changed() });
        }
    }

    #[test]
    fn test_converges_on_first_round() {
        let mut controller = RetryController::default();
        to_judge(&mut controller);
        round(&mut controller, 0);

        assert_eq!(controller.state(), ExecutionState::Success);
        assert_eq!(controller.iteration(), 1);
        assert_eq!(controller.stop_reason(), Some(&StopReason::Converged));
    }

    #[test]
    fn test_retry_increments_iteration() {
        let mut controller = RetryController::default();
        to_judge(&mut controller);
        round(&mut controller, 3);
        assert_eq!(controller.state(), ExecutionState::Judge);
        assert_eq!(controller.iteration(), 2);
    }

    #[test]
    fn test_identical_counts_stop_on_second_round() {
        let mut controller = RetryController::default();
        to_judge(&mut controller);
        round(&mut controller, 2);
        round(&mut controller, 2);

        assert_eq!(controller.state(), ExecutionState::MaxIterations);
        assert_eq!(controller.iteration(), 2);
        assert!(matches!(
            controller.stop_reason(),
            Some(StopReason::NoProgress { failed: 2, .. })
        ));
    }

    #[test]
    fn test_ceiling_with_steady_progress() {
        let mut controller = RetryController::default();
        to_judge(&mut controller);
        for failed in (11..=20).rev() {
            round(&mut controller, failed);
        }

        assert_eq!(controller.state(), ExecutionState::MaxIterations);
        assert_eq!(controller.iteration(), 10);
        assert_eq!(
            controller.stop_reason(),
            Some(&StopReason::IterationCeiling { max: 10 })
        );
    }

    #[test]
    fn test_never_exceeds_ceiling() {
        let policy = RetryPolicy {
            max_iterations: 3,
            no_progress_window: 100,
        };
        let mut controller = RetryController::new(policy);
        to_judge(&mut controller);
        for _ in 0..10 {
            if controller.is_finished() {
                break;
            }
            round(&mut controller, 5);
        }

        let fix_entries = controller
            .history()
            .iter()
            .filter(|r| r.state == ExecutionState::Fix)
            .count();
        assert_eq!(controller.iteration(), 3);
        assert_eq!(fix_entries, 3);
        assert_eq!(
            controller.stop_reason(),
            Some(&StopReason::IterationCeiling { max: 3 })
        );
    }

    #[test]
    fn test_zero_corrections_stalls() {
        let mut controller = RetryController::default();
        controller.handle(Event::Start);
        controller.handle(Event::AuditComplete {
            summary: AuditSummary::empty(),
        });
        controller.handle(Event::CorrectionsApplied {
            stats: CorrectionStats::none(),
        });
        controller.judge(&failing(1), report());

        assert_eq!(controller.state(), ExecutionState::MaxIterations);
        assert_eq!(
            controller.stop_reason(),
            Some(&StopReason::Stalled { failed: 1 })
        );
    }

    #[test]
    fn test_zero_corrections_but_passing_still_succeeds() {
        let mut controller = RetryController::default();
        controller.handle(Event::Start);
        controller.handle(Event::AuditComplete {
            summary: AuditSummary::empty(),
        });
        controller.handle(Event::CorrectionsApplied {
            stats: CorrectionStats::none(),
        });
        controller.judge(&TestOutcome::passing(2), CorrectionReport::new());
        assert_eq!(controller.state(), ExecutionState::Success);
    }

    #[test]
    fn test_empty_report_is_unactionable() {
        let mut controller = RetryController::default();
        to_judge(&mut controller);
        controller.judge(&failing(1), CorrectionReport::new());

        assert_eq!(controller.state(), ExecutionState::MaxIterations);
        assert!(matches!(
            controller.stop_reason(),
            Some(StopReason::Unactionable { failed: 1, .. })
        ));
    }

    #[test]
    fn test_failure_goes_to_error() {
        let mut controller = RetryController::default();
        controller.handle(Event::Start);
        controller.fail("analyzer crashed");

        assert_eq!(controller.state(), ExecutionState::Error);
        assert!(matches!(
            controller.stop_reason(),
            Some(StopReason::Failed { message }) if message == "analyzer crashed"
        ));
    }

    #[test]
    fn test_history_is_ordered() {
        let mut controller = RetryController::default();
        to_judge(&mut controller);
        round(&mut controller, 0);

        let states: Vec<ExecutionState> = controller.history().iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![
                ExecutionState::Audit,
                ExecutionState::Fix,
                ExecutionState::Judge,
                ExecutionState::Success,
            ]
        );
        assert!(matches!(
            controller.history().last().map(|r| &r.snapshot),
            Some(PhaseSnapshot::Terminal(StopReason::Converged))
        ));
    }
}
