//! Concurrent static analysis over every artifact
//!
//! Analysis fans out over a bounded pool (`JoinSet` + `Semaphore`). Each
//! artifact ends as an explicit [`ArtifactOutcome`]; a failure in one unit
//! never aborts the batch. Aggregation only inspects variants.

use refix_core::{
    AnalysisUnit, ArtifactError, ArtifactErrorKind, ArtifactOutcome, AuditSummary, Issue,
    RefixError, Result,
};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::collaborators::{ArtifactStore, StaticAnalyzer};

/// Default worker pool size
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Fans static analysis out over the artifacts of one store
#[derive(Clone)]
pub struct ConcurrentAnalysisCoordinator {
    store: Arc<dyn ArtifactStore>,
    analyzer: Arc<dyn StaticAnalyzer>,
    analyzer_timeout: Duration,
}

impl ConcurrentAnalysisCoordinator {
    pub fn new(store: Arc<dyn ArtifactStore>, analyzer: Arc<dyn StaticAnalyzer>) -> Self {
        Self {
            store,
            analyzer,
            analyzer_timeout: Duration::from_secs(60),
        }
    }

    /// Per-artifact time budget for the analyzer
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.analyzer_timeout = timeout;
        self
    }

    /// Analyze every artifact with at most `max_workers` in flight
    ///
    /// Only failing to enumerate the artifacts is an error.
    pub async fn audit(&self, max_workers: usize) -> Result<AuditSummary> {
        let names = self.store.list().await?;
        let workers = max_workers.max(1);
        info!(
            "Auditing {} artifacts with {} ({} workers)",
            names.len(),
            self.analyzer.name(),
            workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();
        for (idx, name) in names.iter().cloned().enumerate() {
            let store = Arc::clone(&self.store);
            let analyzer = Arc::clone(&self.analyzer);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.analyzer_timeout;
            join_set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => analyze_artifact(store, analyzer, &name, timeout).await,
                    Err(e) => ArtifactOutcome::Failed(ArtifactError::new(
                        ArtifactErrorKind::Unexpected,
                        format!("worker pool closed: {}", e),
                    )),
                };
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<ArtifactOutcome>> = vec![None; names.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => warn!("Analysis task did not complete: {}", e),
            }
        }

        let results = names
            .into_iter()
            .zip(slots)
            .map(|(name, slot)| {
                let outcome = slot.unwrap_or_else(|| {
                    ArtifactOutcome::Failed(ArtifactError::new(
                        ArtifactErrorKind::Unexpected,
                        "analysis task aborted",
                    ))
                });
                (name, outcome)
            })
            .collect();

        Ok(summarize(results))
    }

    /// Analyze every artifact one at a time
    pub async fn audit_sequential(&self) -> Result<AuditSummary> {
        let names = self.store.list().await?;
        info!("Auditing {} artifacts sequentially", names.len());

        let mut results = BTreeMap::new();
        for name in names {
            let outcome = analyze_artifact(
                Arc::clone(&self.store),
                Arc::clone(&self.analyzer),
                &name,
                self.analyzer_timeout,
            )
            .await;
            results.insert(name, outcome);
        }

        Ok(summarize(results))
    }
}

fn summarize(results: BTreeMap<String, ArtifactOutcome>) -> AuditSummary {
    let summary = AuditSummary::from_outcomes(results);
    info!(
        "Audit finished: {} artifacts, {} issues, {} with errors",
        summary.files_audited, summary.total_issues, summary.files_with_errors
    );
    summary
}

async fn analyze_artifact(
    store: Arc<dyn ArtifactStore>,
    analyzer: Arc<dyn StaticAnalyzer>,
    name: &str,
    timeout: Duration,
) -> ArtifactOutcome {
    match try_analyze(store.as_ref(), analyzer.as_ref(), name, timeout).await {
        Ok(unit) => {
            debug!("{}: {} issues, score {:.2}", name, unit.issue_count(), unit.score);
            ArtifactOutcome::Analyzed(unit)
        }
        Err(e) => {
            warn!("Analysis of {} failed: {}", name, e);
            ArtifactOutcome::Failed(to_artifact_error(e))
        }
    }
}

async fn try_analyze(
    store: &dyn ArtifactStore,
    analyzer: &dyn StaticAnalyzer,
    name: &str,
    timeout: Duration,
) -> Result<AnalysisUnit> {
    let path = store.resolve(name)?;
    let content = store.read(name).await?;

    let report = tokio::time::timeout(timeout, analyzer.analyze(&path))
        .await
        .map_err(|_| RefixError::timeout(format!("analysis of {}", name), timeout.as_secs()))??;

    Ok(AnalysisUnit {
        name: name.to_string(),
        content,
        score: report.score,
        issues: report
            .messages
            .iter()
            .map(|m| Issue::from_analyzer_message(m))
            .collect(),
    })
}

/// Classify a per-artifact failure
pub fn to_artifact_error(err: RefixError) -> ArtifactError {
    let kind = match &err {
        RefixError::Io(io) => match io.kind() {
            ErrorKind::NotFound => ArtifactErrorKind::NotFound,
            ErrorKind::PermissionDenied => ArtifactErrorKind::PermissionDenied,
            _ => ArtifactErrorKind::Unexpected,
        },
        RefixError::Timeout { .. } => ArtifactErrorKind::Timeout,
        RefixError::Analyzer(_) => ArtifactErrorKind::Analyzer,
        RefixError::PathTraversal(_) => ArtifactErrorKind::PermissionDenied,
        _ => ArtifactErrorKind::Unexpected,
    };
    ArtifactError::new(kind, err.to_string())
}
