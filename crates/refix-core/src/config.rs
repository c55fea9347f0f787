//! Configuration management for refix
//!
//! Settings live in `.refix/config.toml` inside the target directory. Every
//! field has a default, so a missing or partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{RefixError, Result};

/// Relative location of the config file inside a target directory
pub const CONFIG_PATH: &str = ".refix/config.toml";

/// Top-level refix configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefixConfig {
    /// Retry loop limits
    #[serde(default, rename = "loop")]
    pub loop_limits: LoopLimits,

    /// Static analysis settings
    #[serde(default)]
    pub audit: AuditConfig,

    /// Per-collaborator time budgets
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// External commands
    #[serde(default)]
    pub commands: CommandConfig,

    /// Telemetry log settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Retry loop limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopLimits {
    /// Hard ceiling on fix/validate iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Consecutive validation rounds allowed without a strict drop in failures
    #[serde(default = "default_no_progress_window")]
    pub no_progress_window: usize,
}

/// Which static analyzer to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    #[default]
    Pylint,
    Heuristic,
}

impl std::str::FromStr for AnalyzerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pylint" => Ok(Self::Pylint),
            "heuristic" => Ok(Self::Heuristic),
            _ => Err(format!("Invalid analyzer: {}. Use pylint or heuristic.", s)),
        }
    }
}

/// Static analysis settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Worker pool size for concurrent analysis
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// File extensions treated as artifacts
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub analyzer: AnalyzerKind,
}

/// Per-collaborator time budgets, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_analyzer_secs")]
    pub analyzer_secs: u64,

    #[serde(default = "default_validator_secs")]
    pub validator_secs: u64,

    #[serde(default = "default_corrector_secs")]
    pub corrector_secs: u64,
}

/// External commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Python interpreter used for pylint and pytest
    #[serde(default = "default_python")]
    pub python: String,

    /// Corrective-stage command (program followed by its arguments)
    #[serde(default)]
    pub corrector: Option<Vec<String>>,
}

/// Telemetry log settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Append-only JSON-lines file
    #[serde(default = "default_telemetry_path")]
    pub path: PathBuf,
}

// Default value providers
fn default_max_iterations() -> usize {
    10
}

fn default_no_progress_window() -> usize {
    2
}

fn default_max_workers() -> usize {
    4
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_analyzer_secs() -> u64 {
    60
}

fn default_validator_secs() -> u64 {
    60
}

fn default_corrector_secs() -> u64 {
    300
}

fn default_python() -> String {
    "python".to_string()
}

fn default_telemetry_path() -> PathBuf {
    PathBuf::from("logs/refix_telemetry.jsonl")
}

impl RefixConfig {
    /// Load configuration from `.refix/config.toml` or use defaults
    pub fn load_or_default(target_dir: &Path) -> Result<Self> {
        let config_path = target_dir.join(CONFIG_PATH);

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            RefixError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.refix/config.toml`
    pub fn write_default(target_dir: &Path) -> Result<PathBuf> {
        let config_path = target_dir.join(CONFIG_PATH);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| RefixError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.loop_limits.max_iterations == 0 {
            return Err(RefixError::Config(
                "loop.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.audit.max_workers == 0 {
            return Err(RefixError::Config(
                "audit.max_workers must be at least 1".to_string(),
            ));
        }
        if self.audit.extensions.is_empty() {
            return Err(RefixError::Config(
                "audit.extensions must name at least one extension".to_string(),
            ));
        }
        if let Some(cmd) = &self.commands.corrector {
            if cmd.is_empty() {
                return Err(RefixError::Config(
                    "commands.corrector must include a program".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            no_progress_window: default_no_progress_window(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            extensions: default_extensions(),
            analyzer: AnalyzerKind::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            analyzer_secs: default_analyzer_secs(),
            validator_secs: default_validator_secs(),
            corrector_secs: default_corrector_secs(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            corrector: None,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            path: default_telemetry_path(),
        }
    }
}
