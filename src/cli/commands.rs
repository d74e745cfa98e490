//! CLI command definitions for judge-queue.
//!
//! `submit` is the producer boundary, `work` runs a worker pool until
//! Ctrl-C, `stats` and `reclaim` are operator tools.

use crate::config::{QueueConfig, DEFAULT_LEASE_TTL};
use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    Broker, DeliveryKind, IdempotentProcessor, JobQueue, LoggingProcessor, QueueStats,
    SubmissionProcessor, SubmissionProducer, WorkerPool,
};
use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Producer/worker submission queue backed by Redis.
#[derive(Parser)]
#[command(name = "judge-queue")]
#[command(about = "Queue code submissions and process them with a pool of workers")]
#[command(version)]
#[command(
    long_about = "judge-queue appends code submissions to a shared Redis list and runs workers that take them off one at a time.\n\nExample usage:\n  judge-queue submit --problem-id two-sum --language python --file solution.py\n  judge-queue work --workers 4 --delivery leased --lease-ttl 30"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Queue name.
    #[arg(short, long, global = true)]
    pub queue: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Append one submission to the queue.
    Submit(SubmitArgs),

    /// Run a worker pool until Ctrl-C.
    #[command(alias = "worker")]
    Work(WorkArgs),

    /// Print queue statistics as JSON.
    Stats,

    /// Return expired leases to the queue.
    Reclaim(ReclaimArgs),
}

/// Arguments for `judge-queue submit`.
#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["code", "file"])))]
pub struct SubmitArgs {
    /// Problem identifier.
    #[arg(short, long)]
    pub problem_id: String,

    /// Submission language tag.
    #[arg(short = 'L', long)]
    pub language: String,

    /// Source code given inline.
    #[arg(short, long)]
    pub code: Option<String>,

    /// Read source code from a file.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output the written submission as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `judge-queue work`.
#[derive(Parser, Debug)]
pub struct WorkArgs {
    /// Number of workers.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Delivery mode: at-most-once or leased.
    #[arg(short, long)]
    pub delivery: Option<DeliveryKind>,

    /// Lease duration in seconds under leased delivery.
    #[arg(long)]
    pub lease_ttl: Option<u64>,

    /// Simulated processing time per submission in milliseconds.
    #[arg(long)]
    pub processing_ms: Option<u64>,

    /// Per-submission processing limit in seconds.
    #[arg(long)]
    pub job_timeout: Option<u64>,

    /// Comma-separated languages accepted by the processor.
    #[arg(long)]
    pub languages: Option<String>,

    /// Skip submissions that already completed in this process.
    #[arg(long)]
    pub dedup: bool,

    /// Print Prometheus metrics on exit.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `judge-queue reclaim`.
#[derive(Parser, Debug)]
pub struct ReclaimArgs {
    /// Also requeue every in-flight entry, leased or not. Only safe when no
    /// worker is running.
    #[arg(long)]
    pub recover_all: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Submit(args) => run_submit_command(config, args).await,
        Commands::Work(args) => run_work_command(config, args).await,
        Commands::Stats => run_stats_command(config).await,
        Commands::Reclaim(args) => run_reclaim_command(config, args).await,
    }
}

/// Environment configuration with global CLI flags applied on top.
fn resolve_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let mut config = QueueConfig::from_env().context("Invalid environment configuration")?;

    if let Some(url) = &cli.redis_url {
        config.redis_url = url.clone();
    }
    if let Some(queue) = &cli.queue {
        config.queue_name = queue.clone();
    }

    config.validate()?;
    Ok(config)
}

fn apply_work_args(mut config: QueueConfig, args: &WorkArgs) -> anyhow::Result<QueueConfig> {
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let kind = args.delivery.unwrap_or(if config.delivery.is_leased() {
        DeliveryKind::Leased
    } else {
        DeliveryKind::AtMostOnce
    });
    let ttl = args
        .lease_ttl
        .map(Duration::from_secs)
        .or(config.delivery.lease_ttl())
        .unwrap_or(DEFAULT_LEASE_TTL);
    config.delivery = kind.with_ttl(ttl);

    if let Some(ms) = args.processing_ms {
        config.processing_time = Duration::from_millis(ms);
    }
    if let Some(secs) = args.job_timeout {
        config.job_timeout = Some(Duration::from_secs(secs));
    }
    if args.dedup {
        config.deduplicate = true;
    }

    config.validate()?;
    Ok(config)
}

fn read_code(args: &SubmitArgs) -> anyhow::Result<String> {
    match (&args.code, &args.file) {
        (Some(code), _) => Ok(code.clone()),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read source file {}", path.display())),
        (None, None) => Err(anyhow::anyhow!("Either --code or --file is required")),
    }
}

fn parse_language_filter(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn build_processor(
    config: &QueueConfig,
    languages: Option<&str>,
) -> Arc<dyn SubmissionProcessor> {
    let mut processor = LoggingProcessor::new(config.processing_time);
    if let Some(raw) = languages {
        processor = processor.with_languages(parse_language_filter(raw));
    }

    if config.deduplicate {
        Arc::new(IdempotentProcessor::new(processor))
    } else {
        Arc::new(processor)
    }
}

async fn run_submit_command(config: QueueConfig, args: SubmitArgs) -> anyhow::Result<()> {
    let code = read_code(&args)?;
    let queue = JobQueue::open(&config.broker(), &config.queue_name).await?;
    let producer = SubmissionProducer::new(queue);

    let written = producer
        .submit(args.problem_id, code, args.language)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&written)?);
    } else {
        println!(
            "Queued {} ({}) on '{}'",
            written.problem_id, written.language, config.queue_name
        );
    }
    Ok(())
}

async fn run_work_command(config: QueueConfig, args: WorkArgs) -> anyhow::Result<()> {
    let config = apply_work_args(config, &args)?;
    init_metrics()?;

    let processor = build_processor(&config, args.languages.as_deref());
    let mut pool = WorkerPool::new(config.pool_config(), config.broker(), processor);
    pool.start().await?;

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
            pool.shutdown().await.map_err(anyhow::Error::from)
        }
        exits = pool.wait() => {
            warn!(exits = ?exits, "All workers stopped");
            Err(anyhow::anyhow!("All {} workers stopped", exits.len()))
        }
    };

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        skipped = stats.jobs_skipped,
        failed = stats.jobs_failed,
        malformed = stats.entries_malformed,
        average_ms = stats.average_job_duration.as_millis() as u64,
        "Worker pool finished"
    );

    if args.metrics {
        print!("{}", export_metrics());
    }

    result
}

async fn run_stats_command(config: QueueConfig) -> anyhow::Result<()> {
    let stats = collect_stats(&config.broker(), &config).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Reports the delivery mode the workers are configured with, not the
/// default of a fresh handle.
async fn collect_stats(broker: &Broker, config: &QueueConfig) -> anyhow::Result<QueueStats> {
    let queue = JobQueue::open(broker, &config.queue_name)
        .await?
        .with_delivery(config.delivery);
    Ok(queue.stats().await?)
}

async fn run_reclaim_command(config: QueueConfig, args: ReclaimArgs) -> anyhow::Result<()> {
    let queue = JobQueue::open(&config.broker(), &config.queue_name).await?;

    let reclaimed = queue.reclaim_expired().await?;
    println!("Reclaimed {} expired lease(s)", reclaimed);

    if args.recover_all {
        let recovered = queue.recover_in_flight().await?;
        println!("Recovered {} in-flight entries", recovered);
    }
    Ok(())
}
