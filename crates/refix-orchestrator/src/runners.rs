//! Process-backed collaborators
//!
//! Every external command runs under an explicit time budget and is killed
//! when the budget runs out. Only spawning, timing and output parsing live
//! here; what pylint, pytest or the fixer command actually do is theirs.

use async_trait::async_trait;
use refix_core::{CorrectionInput, CorrectionStats, RefixError, Result, TestOutcome};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::artifacts::validate_artifact_name;
use crate::collaborators::{
    AnalyzerReport, CorrectiveActionGenerator, DynamicValidator, StaticAnalyzer,
};

/// Environment variable naming the JSON input file for the corrector
pub const CORRECTION_INPUT_ENV: &str = "REFIX_INPUT";

/// Longest stderr excerpt kept in error messages
const STDERR_EXCERPT_CHARS: usize = 4000;

/// Pylint's usage-error bit
const PYLINT_USAGE_ERROR: i32 = 32;

/// `===== 2 failed, 1 passed in 0.05s =====`
static PYTEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^=+\s.*\b(?:passed|failed|errors?|no tests ran|deselected|skipped)\b.*=+\s*$")
        .expect("pytest summary regex")
});

static PYTEST_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+(passed|failed|errors?)\b").expect("pytest count regex")
});

/// `calc.py:3:0: C0116: Missing function or method docstring (missing-function-docstring)`
static PYLINT_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+?:\d+:\d+: [CRWEFI]\d{4}: .+$").expect("pylint message regex")
});

static PYLINT_SCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"rated at (-?\d+(?:\.\d+)?)/10").expect("pylint score regex")
});

/// Captured result of one external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn stderr_excerpt(&self) -> String {
        truncate(self.stderr.trim(), STDERR_EXCERPT_CHARS)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max).collect();
        format!("{}...[truncated]", head)
    } else {
        s.to_string()
    }
}

/// Run a program to completion under a time budget
///
/// Spawn failures surface as `RefixError::Io`; running out of time kills
/// the child and returns `RefixError::Timeout`.
#[instrument(skip(dir, args, envs), fields(dir = %dir.display()))]
pub async fn run_command(
    dir: &Path,
    program: &str,
    args: &[String],
    envs: &[(&str, String)],
    timeout: Duration,
) -> Result<CommandOutput> {
    debug!("Running {} {:?}", program, args);

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!("{} exceeded {}s, killed", program, timeout.as_secs());
            return Err(RefixError::timeout(program, timeout.as_secs()));
        }
    };

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    };
    debug!("{} exited with {:?}", program, result.exit_code);
    Ok(result)
}

/// Dynamic validator running `python -m pytest -v --tb=short`
#[derive(Debug, Clone)]
pub struct PytestValidator {
    python: String,
    timeout: Duration,
}

impl PytestValidator {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DynamicValidator for PytestValidator {
    async fn run(&self, directory: &Path, single: Option<&str>) -> Result<TestOutcome> {
        let target = match single {
            Some(name) => {
                let relative = validate_artifact_name(name)?;
                if !directory.join(&relative).is_file() {
                    return Ok(TestOutcome {
                        errors: 1,
                        lines: vec![format!("Test file not found: {}", name)],
                        ..Default::default()
                    });
                }
                name.to_string()
            }
            None => ".".to_string(),
        };

        let args: Vec<String> = ["-m", "pytest", target.as_str(), "-v", "--tb=short"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match run_command(directory, &self.python, &args, &[], self.timeout).await {
            Ok(output) => Ok(parse_pytest_output(&output)),
            Err(RefixError::Timeout { secs, .. }) => Ok(TestOutcome::timed_out(secs)),
            Err(e) => Err(RefixError::Validator(format!(
                "failed to run {} -m pytest: {}",
                self.python, e
            ))),
        }
    }

    fn name(&self) -> &str {
        "pytest"
    }
}

/// Build a [`TestOutcome`] from pytest's output
///
/// Counts come from the final `=== ... ===` summary line. A non-zero exit
/// without parsed failures (collection problems, "no tests ran") counts
/// as one error so it is never mistaken for success.
pub fn parse_pytest_output(output: &CommandOutput) -> TestOutcome {
    let mut lines: Vec<String> = output.stdout.lines().map(str::to_string).collect();
    lines.extend(
        output
            .stderr
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string),
    );

    let mut outcome = TestOutcome::default();
    if let Some(summary) = lines.iter().rev().find(|l| PYTEST_SUMMARY.is_match(l)) {
        for caps in PYTEST_COUNT.captures_iter(summary) {
            let count: usize = caps[1].parse().unwrap_or(0);
            match &caps[2] {
                "passed" => outcome.passed = count,
                "failed" => outcome.failed = count,
                _ => outcome.errors = count,
            }
        }
    }

    if !output.success() && !outcome.has_failures() {
        outcome.errors = 1;
        lines.push(match output.exit_code {
            Some(5) => "pytest collected no tests".to_string(),
            Some(code) => format!("pytest exited with code {}", code),
            None => "pytest was terminated by a signal".to_string(),
        });
    }

    outcome.success = output.success() && !outcome.has_failures();
    outcome.lines = lines;
    outcome
}

/// Static analyzer running `python -m pylint`
#[derive(Debug, Clone)]
pub struct PylintAnalyzer {
    python: String,
    timeout: Duration,
}

impl PylintAnalyzer {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StaticAnalyzer for PylintAnalyzer {
    async fn analyze(&self, artifact: &Path) -> Result<AnalyzerReport> {
        let dir = artifact.parent().unwrap_or_else(|| Path::new("."));
        let args = vec![
            "-m".to_string(),
            "pylint".to_string(),
            artifact.display().to_string(),
            "--output-format=text".to_string(),
            "--score=y".to_string(),
        ];

        let output = match run_command(dir, &self.python, &args, &[], self.timeout).await {
            Ok(output) => output,
            Err(e @ RefixError::Timeout { .. }) => return Err(e),
            Err(e) => {
                return Err(RefixError::Analyzer(format!(
                    "failed to run {} -m pylint: {}",
                    self.python, e
                )))
            }
        };

        if let Some(code) = output.exit_code {
            if code & PYLINT_USAGE_ERROR != 0 {
                return Err(RefixError::Analyzer(format!(
                    "pylint usage error: {}",
                    output.stderr_excerpt()
                )));
            }
        }

        let report = parse_pylint_output(&output.stdout);
        if !output.success() && report.messages.is_empty() && report.score == 0.0 {
            return Err(RefixError::Analyzer(format!(
                "pylint produced no report: {}",
                output.stderr_excerpt()
            )));
        }
        Ok(report)
    }

    fn name(&self) -> &str {
        "pylint"
    }
}

/// Extract messages and the score from pylint's text output
pub fn parse_pylint_output(stdout: &str) -> AnalyzerReport {
    let messages = stdout
        .lines()
        .map(str::trim)
        .filter(|l| PYLINT_MESSAGE.is_match(l))
        .map(str::to_string)
        .collect();

    let score = PYLINT_SCORE
        .captures(stdout)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .unwrap_or(0.0);

    AnalyzerReport { score, messages }
}

/// Corrective stage backed by a user-supplied command
///
/// The command receives the target directory as its last argument and the
/// JSON-serialized [`CorrectionInput`] in the file named by `REFIX_INPUT`.
/// It reports back with a stdout line such as
/// `{"artifacts_changed": 1, "total_corrections": 3}`; the last such line wins.
#[derive(Debug, Clone)]
pub struct CommandCorrector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCorrector {
    /// Build from a program followed by its arguments
    pub fn from_command(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| RefixError::Config("corrector command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }
}

#[async_trait]
impl CorrectiveActionGenerator for CommandCorrector {
    async fn apply(&self, directory: &Path, input: &CorrectionInput) -> Result<CorrectionStats> {
        let mut input_file = tempfile::Builder::new()
            .prefix("refix-input-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer(&mut input_file, input)?;
        input_file.flush()?;

        let mut args = self.args.clone();
        args.push(directory.display().to_string());
        let envs = [(
            CORRECTION_INPUT_ENV,
            input_file.path().display().to_string(),
        )];

        let output = match run_command(directory, &self.program, &args, &envs, self.timeout).await
        {
            Ok(output) => output,
            Err(e @ RefixError::Timeout { .. }) => return Err(e),
            Err(e) => {
                return Err(RefixError::Corrector(format!(
                    "failed to run {}: {}",
                    self.program, e
                )))
            }
        };

        if !output.success() {
            return Err(RefixError::Corrector(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.exit_code,
                output.stderr_excerpt()
            )));
        }

        parse_correction_stats(&output.stdout).ok_or_else(|| {
            RefixError::Corrector(format!("{} printed no result line", self.program))
        })
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Last stdout line that parses as [`CorrectionStats`]
pub fn parse_correction_stats(stdout: &str) -> Option<CorrectionStats> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<CorrectionStats>(l).ok())
}
