//! CLI command definitions for qgov.
//!
//! `serve` and `worker` run the long-lived processes; the remaining commands
//! are one-shot operator tools.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use super::runtime::{shutdown_signal, spawn_cache_probe, Backends};
use crate::api::{self, AppState};
use crate::config::{AppConfig, LogFormat};
use crate::domain::{GovernanceRecord, RecordKind, Severity, TenantId};
use crate::metrics::{init_metrics, MetricsCollector};
use crate::scoring::{AuditScorer, AuditTemplate, Outcome, Responses, ScoreReport};
use crate::storage::MigrationRunner;

/// Quality and ISO governance backend.
#[derive(Parser, Debug)]
#[command(name = "qgov")]
#[command(about = "Multi-tenant quality governance backend: workflows, audit scoring and jobs")]
#[command(version)]
#[command(
    long_about = "qgov runs the governance HTTP API and background workers, and provides operator tools.\n\nExample usage:\n  qgov --config qgov.yaml serve\n  qgov score --template iso9001.yaml --responses run.json --strict"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// YAML configuration file.
    #[arg(short, long, env = "QGOV_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format (pretty, json). Overrides the config file.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API.
    Serve(ServeArgs),

    /// Run background job workers and the cleanup scheduler.
    Worker(WorkerArgs),

    /// Apply the database schema.
    Migrate(MigrateArgs),

    /// Score an audit run against a template without storing it.
    Score(ScoreArgs),

    /// Inspect or replay the dead-letter queue.
    Dlq(DlqArgs),

    /// Manage governance records.
    Record(RecordArgs),

    /// Inspect configuration.
    Config(ConfigArgs),
}

/// Arguments for `qgov serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind, e.g. 0.0.0.0:8080. Overrides `server.bind`.
    #[arg(long)]
    pub bind: Option<String>,

    /// Run job workers inside the server process. Always on with an
    /// in-memory queue.
    #[arg(long)]
    pub embedded_workers: bool,
}

/// Arguments for `qgov worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of workers. Overrides `jobs.workers`.
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,
}

/// Arguments for `qgov migrate`.
#[derive(Parser, Debug)]
pub struct MigrateArgs {
    /// Drop all governance tables before migrating.
    #[arg(long)]
    pub reset: bool,

    /// Confirm a destructive `--reset`.
    #[arg(long)]
    pub yes: bool,
}

/// Arguments for `qgov score`.
#[derive(Parser, Debug)]
pub struct ScoreArgs {
    /// Audit template (YAML).
    #[arg(short, long)]
    pub template: PathBuf,

    /// Responses keyed by question id (JSON or YAML).
    #[arg(short, long)]
    pub responses: PathBuf,

    /// Fail when required questions are unanswered.
    #[arg(long)]
    pub strict: bool,

    /// Print the full report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `qgov dlq`.
#[derive(Parser, Debug)]
pub struct DlqArgs {
    #[command(subcommand)]
    pub command: DlqCommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum DlqCommand {
    /// Show dead-lettered jobs, oldest first.
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Move dead-lettered jobs back to the queue with fresh attempts.
    Replay {
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },
}

/// Arguments for `qgov record`.
#[derive(Parser, Debug)]
pub struct RecordArgs {
    #[command(subcommand)]
    pub command: RecordCommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum RecordCommand {
    /// Open a new draft record and print it as JSON.
    Open(OpenRecordArgs),
}

#[derive(Parser, Debug)]
pub struct OpenRecordArgs {
    #[arg(long)]
    pub tenant: String,

    /// Record kind (capa, incident, complaint, risk, audit, investigation, policy, document).
    #[arg(long)]
    pub kind: String,

    #[arg(long)]
    pub title: String,

    /// Severity (low, medium, high, critical).
    #[arg(long, default_value = "medium")]
    pub severity: String,

    #[arg(long)]
    pub owner: Option<String>,

    /// Attributes as a JSON object.
    #[arg(long)]
    pub attributes: Option<String>,
}

/// Arguments for `qgov config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration with secrets redacted.
    Show,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Loads the configuration and applies the global CLI overrides.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())
        .with_context(|| match &cli.config {
            Some(path) => format!("failed to load configuration from {}", path.display()),
            None => "failed to load configuration".to_string(),
        })?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    Ok(config)
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    let cli = parse_cli();
    let config = load_config(&cli)?;
    run_with_cli(cli, config).await
}

/// Run the CLI with parsed arguments and loaded configuration.
pub async fn run_with_cli(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args, config).await,
        Commands::Worker(args) => run_worker_command(args, config).await,
        Commands::Migrate(args) => run_migrate_command(args, config).await,
        Commands::Score(args) => run_score_command(args),
        Commands::Dlq(args) => run_dlq_command(args, config).await,
        Commands::Record(args) => run_record_command(args, config).await,
        Commands::Config(args) => run_config_command(args, config),
    }
}

// ============================================================================
// Long-running processes
// ============================================================================

async fn run_serve_command(args: ServeArgs, config: AppConfig) -> anyhow::Result<()> {
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", bind))?;

    init_metrics().context("failed to register metrics")?;
    let metrics = MetricsCollector::new();
    let backends = Backends::connect(&config).await?;
    let service = Arc::new(backends.service(&config, metrics.clone()));

    let mut runner = if args.embedded_workers || backends.memory_queue {
        let mut runner = backends.job_runner(&config, metrics)?;
        runner.start().await?;
        info!(workers = config.jobs.workers, "Embedded job workers started");
        Some(runner)
    } else {
        None
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let probe = spawn_cache_probe(
        backends.cache.clone(),
        Duration::from_secs(config.cache.probe_interval_secs.max(1)),
        stop_rx,
    );

    let state = AppState::new(service)
        .with_request_timeout(Duration::from_secs(config.server.request_timeout_secs));
    let served = api::serve(state, addr, shutdown_signal()).await;

    let _ = stop_tx.send(true);
    if let Err(e) = probe.await {
        warn!(error = %e, "Cache probe task failed");
    }
    if let Some(runner) = runner.as_mut() {
        runner.shutdown().await?;
    }

    served.context("HTTP server failed")?;
    info!("Server stopped");
    Ok(())
}

async fn run_worker_command(args: WorkerArgs, mut config: AppConfig) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        config.jobs.workers = workers;
    }

    init_metrics().context("failed to register metrics")?;
    let backends = Backends::connect(&config).await?;
    if backends.memory_queue {
        warn!("Job queue is in memory; this worker only sees jobs it schedules itself");
    }

    let mut runner = backends.job_runner(&config, MetricsCollector::new())?;
    runner.start().await?;
    info!(
        workers = config.jobs.workers,
        queue = %config.jobs.queue_name,
        "Worker started"
    );

    shutdown_signal().await;
    runner.shutdown().await?;

    let stats = runner.pool.stats();
    info!(
        completed = stats.jobs_completed,
        retried = stats.jobs_retried,
        dead_lettered = stats.jobs_dead_lettered,
        "Worker stopped"
    );
    Ok(())
}

// ============================================================================
// Operator tools
// ============================================================================

async fn run_migrate_command(args: MigrateArgs, config: AppConfig) -> anyhow::Result<()> {
    if config.database.url.is_none() {
        bail!("database.url (or DATABASE_URL) is required for migrations");
    }
    let database = crate::storage::Database::connect(&config.database).await?;
    let runner = MigrationRunner::new(database.pool().clone());

    if args.reset {
        if !args.yes {
            bail!("--reset drops all governance data; rerun with --yes to confirm");
        }
        runner.reset_database().await?;
        warn!("Database reset");
    }

    let applied = runner.run_migrations().await?;
    println!("Applied {} migration(s)", applied);
    for migration in runner.list_applied_migrations().await? {
        println!("  {}  {}", migration.applied_at.to_rfc3339(), migration.name);
    }
    Ok(())
}

fn run_score_command(args: ScoreArgs) -> anyhow::Result<()> {
    let template = AuditTemplate::from_file(&args.template)
        .with_context(|| format!("failed to load template {}", args.template.display()))?;
    let responses = load_responses(&args.responses)?;

    let report = AuditScorer::new()
        .with_strict(args.strict)
        .score(&template, &responses)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&template, &report);
    }
    Ok(())
}

fn load_responses(path: &Path) -> anyhow::Result<Responses> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read responses {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let responses = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    Ok(responses)
}

fn print_report(template: &AuditTemplate, report: &ScoreReport) {
    println!("{} (v{})", template.name, report.template_version);
    for section in &report.sections {
        let score = section
            .score
            .map(|s| format!("{:6.1}%", s))
            .unwrap_or_else(|| "    n/a".to_string());
        println!(
            "  {:<40} {}  ({}/{} scored)",
            section.title, score, section.scored, section.answered
        );
    }

    let overall = report
        .percentage
        .map(|p| format!("{:.1}%", p))
        .unwrap_or_else(|| "n/a".to_string());
    let verdict = match report.outcome {
        Outcome::Pass => "PASS",
        Outcome::Fail => "FAIL",
        Outcome::Incomplete => "INCOMPLETE",
    };
    println!(
        "Overall: {} (threshold {:.1}%) -> {}",
        overall, report.pass_threshold, verdict
    );
    if report.critical_failures > 0 {
        println!("Critical failures: {}", report.critical_failures);
    }
    if !report.unanswered.is_empty() {
        println!("Unanswered: {}", report.unanswered.join(", "));
    }
    for finding in &report.findings {
        println!(
            "  finding [{:?}] {}/{}: {}",
            finding.severity, finding.section_id, finding.question_id, finding.answer
        );
    }
}

async fn run_dlq_command(args: DlqArgs, config: AppConfig) -> anyhow::Result<()> {
    let backends = Backends::connect(&config).await?;
    if backends.memory_queue {
        bail!("redis.url (or REDIS_URL) is required to inspect the dead-letter queue");
    }

    match args.command {
        DlqCommand::List { limit } => {
            let entries = backends.jobs.peek_dead_letter(limit).await?;
            if entries.is_empty() {
                println!("Dead-letter queue is empty");
            }
            for entry in entries {
                println!(
                    "{}  {}  {:<10}  attempts={}  tenant={}  {}",
                    entry.moved_at.to_rfc3339(),
                    entry.job.id,
                    entry.job.kind.name(),
                    entry.job.attempts,
                    entry.job.tenant_label(),
                    entry.error
                );
            }
        }
        DlqCommand::Replay { limit } => {
            let replayed = backends.jobs.replay_dead_letter(limit).await?;
            println!("Replayed {} job(s)", replayed);
        }
    }
    Ok(())
}

async fn run_record_command(args: RecordArgs, config: AppConfig) -> anyhow::Result<()> {
    match args.command {
        RecordCommand::Open(args) => {
            let tenant = TenantId::parse(&args.tenant)?;
            let kind: RecordKind = args.kind.parse()?;
            let severity: Severity = args.severity.parse()?;

            let mut draft = GovernanceRecord::draft(tenant, kind, &args.title)?.with_severity(severity);
            if let Some(owner) = args.owner {
                draft = draft.with_owner(owner);
            }
            if let Some(raw) = args.attributes {
                let attributes: serde_json::Value =
                    serde_json::from_str(&raw).context("--attributes must be JSON")?;
                draft = draft.with_attributes(attributes)?;
            }

            let backends = Backends::connect(&config).await?;
            if backends.database.is_none() {
                warn!("Record stored in memory only; configure database.url to persist it");
            }
            let service = backends.service(&config, MetricsCollector::new());
            let record = service.open_record(draft).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

fn run_config_command(args: ConfigArgs, config: AppConfig) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => print!("{}", config.to_redacted_yaml()?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_score_command() {
        let cli = Cli::try_parse_from([
            "qgov",
            "--log-level",
            "debug",
            "score",
            "--template",
            "t.yaml",
            "--responses",
            "r.json",
            "--strict",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Score(args) => {
                assert!(args.strict);
                assert!(!args.json);
                assert_eq!(args.template, PathBuf::from("t.yaml"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_dlq_replay() {
        let cli = Cli::try_parse_from(["qgov", "dlq", "replay", "-n", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Dlq(DlqArgs {
                command: DlqCommand::Replay { limit: 5 }
            })
        ));
    }

    #[test]
    fn test_load_responses_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("run.json");
        std::fs::File::create(&json_path)
            .unwrap()
            .write_all(br#"{"q1": "yes", "q2": 4}"#)
            .unwrap();
        assert_eq!(load_responses(&json_path).unwrap().len(), 2);

        let yaml_path = dir.path().join("run.yaml");
        std::fs::File::create(&yaml_path)
            .unwrap()
            .write_all(b"q1: n/a\nq3: 87.5\n")
            .unwrap();
        let responses = load_responses(&yaml_path).unwrap();
        assert!(responses["q1"].is_not_applicable());
    }

    #[test]
    fn test_global_overrides_apply_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qgov.yaml");
        std::fs::write(&path, "logging:\n  level: warn\n  format: pretty\n").unwrap();

        let cli = Cli::try_parse_from([
            "qgov",
            "--config",
            path.to_str().unwrap(),
            "--log-format",
            "json",
            "config",
            "show",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "warn");
    }
}
