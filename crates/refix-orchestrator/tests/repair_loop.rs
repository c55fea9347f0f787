//! End-to-end runs of the repair loop against in-memory collaborators

use refix_core::{
    AnalysisUnit, ArtifactOutcome, CorrectionInput, ExecutionState, PhaseSnapshot, StopReason,
    TestOutcome,
};
use refix_orchestrator::mock::{
    failing_outcome, CorrectorStep, MapAnalyzer, MemoryTelemetry, MockFailure, ScriptedCorrector,
    ScriptedValidator, ValidatorStep,
};
use refix_orchestrator::{
    translate, AnalyzerReport, Collaborators, ConcurrentAnalysisCoordinator, FsArtifactStore,
    JsonlTelemetryLog, Orchestrator, RunConfig,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    analyzer: Arc<MapAnalyzer>,
    validator: Arc<ScriptedValidator>,
    corrector: Arc<ScriptedCorrector>,
    telemetry: Arc<MemoryTelemetry>,
}

impl Harness {
    fn new(validator: ScriptedValidator, corrector: ScriptedCorrector) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("calc.py"), "def add(a, b):\n    return a - b\n").unwrap();
        std::fs::write(
            dir.path().join("calc_test.py"),
            "from calc import add\n\ndef test_add():\n    assert add(2, 3) == 5\n",
        )
        .unwrap();

        Self {
            dir,
            analyzer: Arc::new(MapAnalyzer::new()),
            validator: Arc::new(validator),
            corrector: Arc::new(corrector),
            telemetry: Arc::new(MemoryTelemetry::new()),
        }
    }

    fn collaborators(&self, store_root: &Path) -> Collaborators {
        Collaborators {
            store: Arc::new(FsArtifactStore::python(store_root)),
            analyzer: self.analyzer.clone(),
            validator: self.validator.clone(),
            corrector: self.corrector.clone(),
            telemetry: self.telemetry.clone(),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.dir.path(),
            RunConfig::default(),
            self.collaborators(self.dir.path()),
        )
    }
}

fn fix_transitions(history: &[refix_core::IterationRecord]) -> usize {
    history
        .iter()
        .filter(|r| matches!(r.snapshot, PhaseSnapshot::Corrections(_)))
        .count()
}

#[tokio::test]
async fn converges_on_first_judge() {
    let harness = Harness::new(
        ScriptedValidator::outcomes([TestOutcome::passing(3)]),
        ScriptedCorrector::always_changes(),
    );

    let report = harness.orchestrator().run().await;

    assert_eq!(report.state, ExecutionState::Success);
    assert_eq!(report.stop_reason, StopReason::Converged);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(harness.corrector.calls(), 1);
    assert_eq!(harness.validator.calls(), 1);

    let inputs = harness.corrector.inputs().await;
    assert!(matches!(inputs[0], CorrectionInput::Audit(_)));
}

#[tokio::test]
async fn strictly_decreasing_failures_hit_the_ceiling() {
    let outcomes: Vec<TestOutcome> = (0..10)
        .map(|round| failing_outcome("calc_test.py", 11 - round))
        .collect();
    let harness = Harness::new(
        ScriptedValidator::outcomes(outcomes),
        ScriptedCorrector::always_changes(),
    );

    let report = harness.orchestrator().run().await;

    assert_eq!(report.state, ExecutionState::MaxIterations);
    assert_eq!(report.stop_reason, StopReason::IterationCeiling { max: 10 });
    assert_eq!(report.iterations, 10);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(harness.corrector.calls(), 10);
    assert_eq!(harness.validator.calls(), 10);
    assert_eq!(fix_transitions(&report.history), 10);
    assert!(report.execution_summary().max_reached);
}

#[tokio::test]
async fn later_rounds_receive_translated_reports() {
    let harness = Harness::new(
        ScriptedValidator::outcomes([failing_outcome("calc_test.py", 2), TestOutcome::passing(3)]),
        ScriptedCorrector::always_changes(),
    );

    let report = harness.orchestrator().run().await;
    assert_eq!(report.state, ExecutionState::Success);
    assert_eq!(report.iterations, 2);

    let inputs = harness.corrector.inputs().await;
    assert_eq!(inputs.len(), 2);
    match &inputs[1] {
        CorrectionInput::Report(correction) => {
            assert_eq!(correction.artifacts().collect::<Vec<_>>(), vec!["calc.py"]);
            assert_eq!(correction.issue_count(), 2);
        }
        other => panic!("expected a correction report, got {:?}", other),
    }
}

#[tokio::test]
async fn identical_failures_stop_on_second_round() {
    let harness = Harness::new(
        ScriptedValidator::outcomes([
            failing_outcome("calc_test.py", 3),
            failing_outcome("calc_test.py", 3),
        ]),
        ScriptedCorrector::always_changes(),
    );

    let report = harness.orchestrator().run().await;

    assert_eq!(report.state, ExecutionState::MaxIterations);
    assert!(matches!(
        report.stop_reason,
        StopReason::NoProgress { failed: 3, .. }
    ));
    assert_eq!(report.iterations, 2);
    assert!(report.iterations < report.max_iterations);
}

#[tokio::test]
async fn corrector_without_changes_stalls() {
    let harness = Harness::new(
        ScriptedValidator::outcomes([failing_outcome("calc_test.py", 1)]),
        ScriptedCorrector::new([CorrectorStep::Stats(Default::default())]),
    );

    let report = harness.orchestrator().run().await;

    assert_eq!(report.state, ExecutionState::MaxIterations);
    assert_eq!(report.stop_reason, StopReason::Stalled { failed: 1 });
    assert_eq!(harness.corrector.calls(), 1);
}

#[tokio::test]
async fn validator_error_ends_in_error() {
    let harness = Harness::new(
        ScriptedValidator::new([ValidatorStep::Fail("pytest not installed".into())]),
        ScriptedCorrector::always_changes(),
    );

    let report = harness.orchestrator().run().await;

    assert_eq!(report.state, ExecutionState::Error);
    assert_eq!(report.exit_code(), 1);
    assert!(report.cause().contains("pytest not installed"));
}

#[tokio::test]
async fn corrector_error_ends_in_error() {
    let harness = Harness::new(
        ScriptedValidator::outcomes([TestOutcome::passing(1)]),
        ScriptedCorrector::new([CorrectorStep::Fail("model unavailable".into())]),
    );

    let report = harness.orchestrator().run().await;

    assert_eq!(report.state, ExecutionState::Error);
    assert!(matches!(report.stop_reason, StopReason::Failed { .. }));
    assert_eq!(harness.validator.calls(), 0);
}

#[tokio::test]
async fn audit_failure_ends_in_error() {
    let harness = Harness::new(
        ScriptedValidator::outcomes([TestOutcome::passing(1)]),
        ScriptedCorrector::always_changes(),
    );
    let missing = harness.dir.path().join("not-there");

    let orchestrator = Orchestrator::new(
        harness.dir.path(),
        RunConfig::default(),
        harness.collaborators(&missing),
    );
    let report = orchestrator.run().await;

    assert_eq!(report.state, ExecutionState::Error);
    assert!(report.cause().starts_with("ERROR: Audit failed"));
    assert_eq!(harness.corrector.calls(), 0);
}

#[tokio::test]
async fn missing_target_is_an_error() {
    let harness = Harness::new(
        ScriptedValidator::outcomes([TestOutcome::passing(1)]),
        ScriptedCorrector::always_changes(),
    );
    let missing = harness.dir.path().join("nope");

    let orchestrator = Orchestrator::new(
        &missing,
        RunConfig::default(),
        harness.collaborators(&missing),
    );
    let report = orchestrator.run().await;

    assert_eq!(report.state, ExecutionState::Error);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.iterations, 0);
    assert!(report.cause().contains("Target directory does not exist"));
    assert_eq!(harness.analyzer.calls(), 0);
    assert_eq!(harness.corrector.calls(), 0);
}

#[tokio::test]
async fn fix_transitions_never_exceed_the_ceiling() {
    for max_iterations in [1, 3, 10] {
        let outcomes: Vec<TestOutcome> = (0..20)
            .map(|round| failing_outcome("calc_test.py", 30 - round))
            .collect();
        let harness = Harness::new(
            ScriptedValidator::outcomes(outcomes),
            ScriptedCorrector::always_changes(),
        );

        let mut config = RunConfig::default();
        config.policy.max_iterations = max_iterations;
        let orchestrator = Orchestrator::new(
            harness.dir.path(),
            config,
            harness.collaborators(harness.dir.path()),
        );
        let report = orchestrator.run().await;

        assert_eq!(report.state, ExecutionState::MaxIterations);
        assert_eq!(fix_transitions(&report.history), max_iterations);
        assert_eq!(harness.corrector.calls(), max_iterations);
    }
}

#[tokio::test]
async fn only_success_exits_zero() {
    let cases = [
        (vec![TestOutcome::passing(1)], 0),
        (vec![failing_outcome("calc_test.py", 2); 2], 1),
    ];

    for (outcomes, expected) in cases {
        let harness = Harness::new(
            ScriptedValidator::outcomes(outcomes),
            ScriptedCorrector::always_changes(),
        );
        let report = harness.orchestrator().run().await;
        assert_eq!(report.exit_code(), expected, "{}", report.cause());
        assert_eq!(report.exit_code() == 0, report.state == ExecutionState::Success);
    }
}

#[tokio::test]
async fn sequential_and_concurrent_audits_agree() {
    let dir = TempDir::new().unwrap();
    for name in ["a.py", "b.py", "c.py", "pkg/d.py", "pkg/e.py"] {
        let path = dir.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x = 1\n").unwrap();
    }
    let analyzer = Arc::new(
        MapAnalyzer::new()
            .with_report(
                "a.py",
                AnalyzerReport {
                    score: 8.0,
                    messages: vec!["a.py:1:0: C0114: Missing module docstring".into(); 2],
                },
            )
            .with_failure("b.py", MockFailure::PermissionDenied)
            .with_failure("d.py", MockFailure::Analyzer("crashed".into()))
            .with_report(
                "e.py",
                AnalyzerReport {
                    score: 6.0,
                    messages: vec!["e.py:3:0: W0611: Unused import os".into(); 3],
                },
            ),
    );
    let coordinator = ConcurrentAnalysisCoordinator::new(
        Arc::new(FsArtifactStore::python(dir.path())),
        analyzer,
    );

    let concurrent = coordinator.audit(4).await.unwrap();
    let sequential = coordinator.audit_sequential().await.unwrap();

    assert_eq!(concurrent.files_audited, sequential.files_audited);
    assert_eq!(concurrent.total_issues, sequential.total_issues);
    assert_eq!(concurrent.files_with_errors, sequential.files_with_errors);
    assert_eq!(concurrent.files_audited, 5);
    assert_eq!(concurrent.files_with_errors, 2);

    let counted: usize = concurrent
        .results
        .values()
        .filter_map(ArtifactOutcome::unit)
        .map(AnalysisUnit::issue_count)
        .sum();
    assert_eq!(concurrent.total_issues, counted);
    assert_eq!(counted, 5);
}

#[test]
fn translating_the_same_output_twice_is_identical() {
    let outcome = TestOutcome {
        passed: 0,
        failed: 2,
        errors: 0,
        lines: vec![
            "FAILED calc_test.py::test_add - assert -1 == 5".to_string(),
            "FAILED calc_test.py::test_mul - assert 5 == 6".to_string(),
            "========== 2 failed in 0.03s ==========".to_string(),
        ],
        success: false,
    };

    let first = translate(&outcome);
    let second = translate(&outcome);
    assert_eq!(first, second);

    let issues = first.get("calc.py").unwrap();
    assert_eq!(issues.len(), 2);
    assert!(issues[0].contains("test_add") && issues[0].contains("-1 == 5"));
    assert!(issues[1].contains("test_mul") && issues[1].contains("5 == 6"));
}

#[tokio::test]
async fn telemetry_failure_leaves_outcome_unchanged() {
    let mut harness = Harness::new(
        ScriptedValidator::outcomes([failing_outcome("calc_test.py", 1), TestOutcome::passing(2)]),
        ScriptedCorrector::always_changes(),
    );
    harness.telemetry = Arc::new(MemoryTelemetry::failing());

    let report = harness.orchestrator().run().await;

    assert_eq!(report.state, ExecutionState::Success);
    assert_eq!(report.iterations, 2);
    assert_eq!(harness.telemetry.flushes(), 1);
}

#[tokio::test]
async fn telemetry_file_holds_one_line_per_phase() {
    let harness = Harness::new(
        ScriptedValidator::outcomes([TestOutcome::passing(1)]),
        ScriptedCorrector::always_changes(),
    );
    let log_path = harness.dir.path().join("logs").join("telemetry.jsonl");
    let telemetry = Arc::new(JsonlTelemetryLog::open(&log_path).await.unwrap());

    let mut collaborators = harness.collaborators(harness.dir.path());
    collaborators.telemetry = telemetry;
    let orchestrator = Orchestrator::new(harness.dir.path(), RunConfig::default(), collaborators);
    let report = orchestrator.run().await;
    assert_eq!(report.state, ExecutionState::Success);

    // start, audit, fix, validation, finish
    let records = JsonlTelemetryLog::read_all(&log_path).await.unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].actor, "orchestrator");
    assert_eq!(records[2].actor, "mock-corrector");
}
