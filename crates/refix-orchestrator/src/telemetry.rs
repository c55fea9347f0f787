//! Telemetry records and the JSON-lines log writer
//!
//! One record is appended per phase boundary. The loop never reads the log
//! back; writes are wrapped in `fail_open` by the orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refix_core::{RefixError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::collaborators::TelemetryLog;

/// Maximum characters kept from request/outcome text
const TELEMETRY_TEXT_LIMIT: usize = 2000;

/// What kind of work a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionCategory {
    /// Static analysis / audit
    CodeAnalysis,
    /// Code generation
    CodeGen,
    /// Test runs and failure diagnosis
    Debug,
    /// Corrective rounds
    Fix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Success,
    Failure,
}

impl From<bool> for RecordStatus {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// One telemetry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Component that did the work
    pub actor: String,
    pub action: ActionCategory,
    /// What was asked
    pub request: String,
    /// What came back
    pub outcome: String,
    pub status: RecordStatus,
}

impl TelemetryRecord {
    pub fn new(
        actor: impl Into<String>,
        action: ActionCategory,
        request: impl Into<String>,
        outcome: impl Into<String>,
        status: RecordStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action,
            request: truncate(request.into()),
            outcome: truncate(outcome.into()),
            status,
        }
    }
}

fn truncate(text: String) -> String {
    if text.chars().count() > TELEMETRY_TEXT_LIMIT {
        let truncated: String = text.chars().take(TELEMETRY_TEXT_LIMIT).collect();
        format!("{truncated}...")
    } else {
        text
    }
}

/// Append-only JSON-lines telemetry file
pub struct JsonlTelemetryLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlTelemetryLog {
    /// Open (or create) the log, creating parent directories as needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                RefixError::Telemetry(format!("Failed to open {}: {}", path.display(), e))
            })?;

        debug!("Telemetry log opened at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back (tests and tooling only)
    pub async fn read_all(path: &Path) -> Result<Vec<TelemetryRecord>> {
        let content = fs::read_to_string(path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(RefixError::from))
            .collect()
    }
}

#[async_trait]
impl TelemetryLog for JsonlTelemetryLog {
    async fn append(&self, record: TelemetryRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| RefixError::Telemetry(format!("Failed to append record: {}", e)))?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_all().await?;
        debug!("Telemetry log flushed: {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("telemetry.jsonl");

        let log = JsonlTelemetryLog::open(&path).await.unwrap();
        log.append(TelemetryRecord::new(
            "auditor",
            ActionCategory::CodeAnalysis,
            "audit 3 artifacts",
            "5 issues",
            RecordStatus::Success,
        ))
        .await
        .unwrap();
        log.append(TelemetryRecord::new(
            "judge",
            ActionCategory::Debug,
            "run tests",
            "2 failed",
            RecordStatus::Failure,
        ))
        .await
        .unwrap();
        log.flush().await.unwrap();

        let records = JsonlTelemetryLog::read_all(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].actor, "auditor");
        assert_eq!(records[1].status, RecordStatus::Failure);
        assert_ne!(records[0].id, records[1].id);
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("telemetry.jsonl");

        for _ in 0..2 {
            let log = JsonlTelemetryLog::open(&path).await.unwrap();
            log.append(TelemetryRecord::new(
                "orchestrator",
                ActionCategory::Fix,
                "start",
                "ok",
                RecordStatus::Success,
            ))
            .await
            .unwrap();
            log.flush().await.unwrap();
        }

        let records = JsonlTelemetryLog::read_all(&path).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_record_serialization_vocabulary() {
        let record = TelemetryRecord::new(
            "fixer",
            ActionCategory::CodeAnalysis,
            "req",
            "out",
            RecordStatus::Success,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["action"], "CODE_ANALYSIS");
        assert_eq!(json["status"], "SUCCESS");
    }

    #[test]
    fn test_long_text_truncated() {
        let record = TelemetryRecord::new(
            "judge",
            ActionCategory::Debug,
            "x".repeat(TELEMETRY_TEXT_LIMIT + 10),
            "",
            RecordStatus::from(false),
        );
        assert!(record.request.ends_with("..."));
        assert_eq!(record.request.chars().count(), TELEMETRY_TEXT_LIMIT + 3);
        assert_eq!(record.status, RecordStatus::Failure);
    }
}
