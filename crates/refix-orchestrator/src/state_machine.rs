//! Repair loop state machine
//!
//! `transition` has no side effects: it maps a state and an event to the
//! next state plus the actions the orchestrator must perform. The retry
//! policy runs before a JUDGE event is built, so the machine only sees the
//! resulting [`Verdict`]. Unexpected events land in ERROR instead of
//! panicking.

use refix_core::{
    AuditSummary, CorrectionInput, CorrectionReport, CorrectionStats, ExecutionState, StopReason,
};

/// Outcome of the retry policy for one JUDGE round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Zero failures and zero errors
    Converged,
    /// Failures remain and another corrective round is allowed
    Retry,
    /// Failures remain but the loop must stop
    Exhausted(StopReason),
}

/// Inputs to [`transition`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Begin the run
    Start,
    /// Static analysis finished
    AuditComplete { summary: AuditSummary },
    /// Corrective stage returned
    CorrectionsApplied { stats: CorrectionStats },
    /// Validation finished and the retry policy decided
    Judged {
        verdict: Verdict,
        report: CorrectionReport,
    },
    /// A phase failed
    Failure { message: String },
}

/// Work requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Run static analysis over every artifact
    RunAudit,
    /// Invoke the corrective stage
    ApplyCorrections { input: CorrectionInput },
    /// Invoke the dynamic validator
    RunValidator,
    /// The run reached a terminal state
    Finish { reason: StopReason },
    /// Log activity
    LogActivity { message: String },
}

/// Apply one event to a state
///
/// # Invalid Transitions
/// Any invalid transition results in ERROR with a descriptive message.
/// This function never panics.
pub fn transition(state: ExecutionState, event: Event) -> (ExecutionState, Vec<Action>) {
    match (state, event) {
        (ExecutionState::Init, Event::Start) => (
            ExecutionState::Audit,
            vec![
                Action::LogActivity {
                    message: "Starting static analysis".to_string(),
                },
                Action::RunAudit,
            ],
        ),

        (ExecutionState::Audit, Event::AuditComplete { summary }) => {
            let actions = vec![
                Action::LogActivity {
                    message: format!(
                        "Audit complete: {} artifacts, {} issues, {} with errors",
                        summary.files_audited, summary.total_issues, summary.files_with_errors
                    ),
                },
                Action::ApplyCorrections {
                    input: CorrectionInput::Audit(summary),
                },
            ];
            (ExecutionState::Fix, actions)
        }

        (ExecutionState::Fix, Event::CorrectionsApplied { stats }) => (
            ExecutionState::Judge,
            vec![
                Action::LogActivity {
                    message: format!(
                        "Corrections applied: {} across {} artifacts",
                        stats.total_corrections, stats.artifacts_changed
                    ),
                },
                Action::RunValidator,
            ],
        ),

        (ExecutionState::Judge, Event::Judged { verdict, report }) => match verdict {
            Verdict::Converged => (
                ExecutionState::Success,
                vec![
                    Action::LogActivity {
                        message: "Validation passed".to_string(),
                    },
                    Action::Finish {
                        reason: StopReason::Converged,
                    },
                ],
            ),
            Verdict::Retry => {
                let actions = vec![
                    Action::LogActivity {
                        message: format!(
                            "Validation failed: {} issues across {} artifacts, retrying",
                            report.issue_count(),
                            report.artifact_count()
                        ),
                    },
                    Action::ApplyCorrections {
                        input: CorrectionInput::Report(report),
                    },
                ];
                (ExecutionState::Fix, actions)
            }
            Verdict::Exhausted(reason) => {
                let state = match reason.terminal_state() {
                    ExecutionState::MaxIterations => ExecutionState::MaxIterations,
                    other => {
                        return invalid(
                            ExecutionState::Judge,
                            format!("exhausted verdict mapped to {}", other),
                        )
                    }
                };
                (
                    state,
                    vec![
                        Action::LogActivity {
                            message: format!("Stopping: {}", reason),
                        },
                        Action::Finish { reason },
                    ],
                )
            }
        },

        // Failures from any non-terminal state
        (
            state @ (ExecutionState::Init
            | ExecutionState::Audit
            | ExecutionState::Fix
            | ExecutionState::Judge),
            Event::Failure { message },
        ) => (
            ExecutionState::Error,
            vec![
                Action::LogActivity {
                    message: format!("Error during {}: {}", state, message),
                },
                Action::Finish {
                    reason: StopReason::Failed { message },
                },
            ],
        ),

        // Terminal states and all other invalid pairs
        (state, event) => invalid(
            state,
            format!(
                "Invalid state transition: {} cannot handle {}",
                state,
                event_name(&event)
            ),
        ),
    }
}

fn invalid(state: ExecutionState, message: String) -> (ExecutionState, Vec<Action>) {
    let message = if message.starts_with("Invalid") {
        message
    } else {
        format!("Invalid transition from {}: {}", state, message)
    };
    (
        ExecutionState::Error,
        vec![
            Action::LogActivity {
                message: message.clone(),
            },
            Action::Finish {
                reason: StopReason::Failed { message },
            },
        ],
    )
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::Start => "Start",
        Event::AuditComplete { .. } => "AuditComplete",
        Event::CorrectionsApplied { .. } => "CorrectionsApplied",
        Event::Judged { .. } => "Judged",
        Event::Failure { .. } => "Failure",
    }
}
