//! Refix CLI - bounded repair loop for a directory of Python sources
//!
//! Usage:
//!   refix --target-dir <DIR> --corrector <CMD>...   Run the repair loop
//!   refix --target-dir <DIR> --init-config          Write .refix/config.toml
//!
//! Exits 0 only when the tests pass.

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use refix_core::config::{AnalyzerKind, CONFIG_PATH};
use refix_core::{ArtifactOutcome, AuditSummary, RefixConfig, RunReport};
use refix_orchestrator::{
    validate_target, Collaborators, CommandCorrector, FsArtifactStore, HeuristicAnalyzer,
    JsonlTelemetryLog, Orchestrator, PylintAnalyzer, PytestValidator, RunConfig, StaticAnalyzer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "refix")]
#[command(author, version, about = "Audit, fix and re-test a directory until its tests pass")]
struct Cli {
    /// Directory holding the artifacts and their tests
    #[arg(long, value_name = "DIR")]
    target_dir: PathBuf,

    /// Config file (defaults to <DIR>/.refix/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Hard ceiling on fix/validate iterations
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Audit worker pool size
    #[arg(long)]
    workers: Option<usize>,

    /// Telemetry JSON-lines file
    #[arg(long, value_name = "PATH")]
    telemetry: Option<PathBuf>,

    /// Static analyzer (pylint, heuristic)
    #[arg(long)]
    analyzer: Option<AnalyzerKind>,

    /// Corrective-stage command; the target directory is appended
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "CMD")]
    corrector: Option<Vec<String>>,

    /// Audit artifacts one at a time
    #[arg(long)]
    sequential: bool,

    /// Write a default config into the target directory and exit
    #[arg(long)]
    init_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if cli.init_config {
        return cmd_init_config(&cli.target_dir);
    }

    let report = cmd_run(cli).await?;
    std::process::exit(report.exit_code());
}

fn cmd_init_config(target_dir: &Path) -> Result<()> {
    validate_target(target_dir)?;
    let path = RefixConfig::write_default(target_dir).context("Failed to write default config")?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn cmd_run(cli: Cli) -> Result<RunReport> {
    // Nothing is created on disk for a bad target
    validate_target(&cli.target_dir).context("Invalid --target-dir")?;
    let config = load_config(&cli)?;
    let run_config = RunConfig {
        sequential: cli.sequential,
        ..RunConfig::from(&config)
    };

    let Some(command) = config.commands.corrector.as_deref() else {
        bail!(
            "No corrective stage configured; pass --corrector or set commands.corrector in {}",
            CONFIG_PATH
        );
    };
    let corrector = CommandCorrector::from_command(command, run_config.corrector_timeout)
        .context("Invalid corrector command")?;

    let analyzer: Arc<dyn StaticAnalyzer> = match config.audit.analyzer {
        AnalyzerKind::Pylint => Arc::new(PylintAnalyzer::new(
            config.commands.python.clone(),
            run_config.analyzer_timeout,
        )),
        AnalyzerKind::Heuristic => Arc::new(HeuristicAnalyzer::new()),
    };

    let telemetry = JsonlTelemetryLog::open(&config.telemetry.path)
        .await
        .with_context(|| {
            format!(
                "Failed to open telemetry log {}",
                config.telemetry.path.display()
            )
        })?;

    let collaborators = Collaborators {
        store: Arc::new(FsArtifactStore::new(
            &cli.target_dir,
            config.audit.extensions.clone(),
        )),
        analyzer,
        validator: Arc::new(PytestValidator::new(
            config.commands.python.clone(),
            run_config.validator_timeout,
        )),
        corrector: Arc::new(corrector),
        telemetry: Arc::new(telemetry),
    };

    println!("refix: {}", cli.target_dir.display());
    println!(
        "Max iterations: {}, workers: {}{}",
        run_config.policy.max_iterations,
        run_config.max_workers,
        if run_config.sequential { " (sequential)" } else { "" }
    );
    println!("Telemetry: {}", config.telemetry.path.display());

    let orchestrator = Orchestrator::new(&cli.target_dir, run_config, collaborators);
    let report = orchestrator.run().await;

    if let Some(audit) = &report.audit {
        print_audit(audit);
    }
    print_report(&report);

    Ok(report)
}

/// File config with command-line overrides applied
fn load_config(cli: &Cli) -> Result<RefixConfig> {
    let mut config = match &cli.config {
        Some(path) => RefixConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RefixConfig::load_or_default(&cli.target_dir).context("Failed to load config")?,
    };

    if let Some(max_iterations) = cli.max_iterations {
        config.loop_limits.max_iterations = max_iterations;
    }
    if let Some(workers) = cli.workers {
        config.audit.max_workers = workers;
    }
    if let Some(path) = &cli.telemetry {
        config.telemetry.path = path.clone();
    }
    if let Some(analyzer) = cli.analyzer {
        config.audit.analyzer = analyzer;
    }
    if let Some(command) = &cli.corrector {
        config.commands.corrector = Some(command.clone());
    }

    config.validate().context("Invalid configuration")?;
    info!("Loaded configuration: {:?}", config.loop_limits);
    Ok(config)
}

fn print_audit(audit: &AuditSummary) {
    println!("\nAudit");
    println!("=====");
    println!("Files audited: {}", audit.files_audited);
    println!("Total issues: {}", audit.total_issues);
    println!("Files with errors: {}", audit.files_with_errors);
    println!("Average score: {:.2}/10", audit.average_score());

    for (name, outcome) in &audit.results {
        match outcome {
            ArtifactOutcome::Analyzed(unit) => println!(
                "  {}: {} issue(s), score {:.1}",
                name,
                unit.issue_count(),
                unit.score
            ),
            ArtifactOutcome::Failed(error) => println!("  {}: {}", name, error),
        }
    }
}

fn print_report(report: &RunReport) {
    let summary = report.execution_summary();

    println!("\nResult");
    println!("======");
    println!("Final state: {}", report.state);
    println!("Cause: {}", report.stop_reason);
    println!(
        "Iterations: {}/{}{}",
        summary.total_iterations,
        summary.max_allowed_iterations,
        if summary.max_reached { " (ceiling reached)" } else { "" }
    );
    if let Some(outcome) = &report.final_outcome {
        println!(
            "Last test run: {} passed, {} failed, {} errors",
            outcome.passed, outcome.failed, outcome.errors
        );
    }
    println!(
        "Duration: {:.1}s",
        report.duration().num_milliseconds() as f64 / 1000.0
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("refix").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_full_command_line() {
        let cli = parse(&[
            "--target-dir",
            "proj",
            "--max-iterations",
            "3",
            "--workers",
            "2",
            "--analyzer",
            "heuristic",
            "--sequential",
            "-v",
            "--corrector",
            "python",
            "fixer.py",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.target_dir, PathBuf::from("proj"));
        assert_eq!(cli.max_iterations, Some(3));
        assert_eq!(cli.workers, Some(2));
        assert_eq!(cli.analyzer, Some(AnalyzerKind::Heuristic));
        assert!(cli.sequential && cli.verbose);
        assert_eq!(
            cli.corrector,
            Some(vec!["python".into(), "fixer.py".into(), "--dry-run".into()])
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--target-dir", "p", "--analyzer", "flake8"]).is_err());
        assert!(parse(&["--target-dir", "p", "--workers", "many"]).is_err());

        let help = parse(&["--help"]).err().unwrap();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_flags_override_file_config() {
        let temp_dir = TempDir::new().unwrap();
        RefixConfig::write_default(temp_dir.path()).unwrap();
        let target = temp_dir.path().to_str().unwrap();

        let cli = parse(&[
            "--target-dir",
            target,
            "--max-iterations",
            "4",
            "--telemetry",
            "out.jsonl",
            "--corrector",
            "fixer",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.loop_limits.max_iterations, 4);
        assert_eq!(config.audit.max_workers, 4);
        assert_eq!(config.telemetry.path, PathBuf::from("out.jsonl"));
        assert_eq!(config.commands.corrector, Some(vec!["fixer".to_string()]));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().to_str().unwrap();

        let cli = parse(&["--target-dir", target, "--max-iterations", "0"]).unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[tokio::test]
    async fn test_missing_target_creates_no_telemetry() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent");
        let log_dir = temp_dir.path().join("logs");
        let log_path = log_dir.join("telemetry.jsonl");

        let cli = parse(&[
            "--target-dir",
            missing.to_str().unwrap(),
            "--telemetry",
            log_path.to_str().unwrap(),
            "--corrector",
            "fixer",
        ])
        .unwrap();
        let err = cmd_run(cli).await.err().unwrap();

        assert!(format!("{:#}", err).contains("Target directory does not exist"));
        assert!(!log_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_corrector_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().to_str().unwrap();

        let cli = parse(&["--target-dir", target]).unwrap();
        let err = cmd_run(cli).await.err().unwrap();
        assert!(err.to_string().contains("No corrective stage configured"));
    }
}
