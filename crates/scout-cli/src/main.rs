use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scout_core::ScoutConfig;
use scout_storage::{JobStore, MemoryVideoStore, PgJobStore, PgVideoStore};
use scout_sync::{ImportSummary, ScheduledRunner};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scout-cli")]
#[command(about = "Tutorial Scout command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API against Postgres.
    Serve {
        /// Keep jobs and videos in memory instead; nothing is persisted.
        #[arg(long)]
        memory: bool,
    },
    /// Import videos from a CSV file.
    Import {
        csv: PathBuf,
        /// Parse and report without touching the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Write every stored video to a CSV file.
    Export { path: PathBuf },
    /// Apply the database schema.
    Migrate,
    /// Create and start one scheduled job, then report its status once.
    ScheduleRun,
    /// Run `schedule-run` on the configured cron schedule until interrupted.
    Daemon,
    /// Delete old job logs and finished jobs.
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = ScoutConfig::from_env().context("reading configuration")?;

    match cli.command.unwrap_or(Commands::Serve { memory: false }) {
        Commands::Serve { memory } => scout_web::serve(&config, memory).await?,
        Commands::Import { csv, dry_run } => {
            let summary = if dry_run {
                let store = MemoryVideoStore::new();
                scout_sync::import_csv(&csv, &store).await?
            } else {
                let store = PgVideoStore::new(connect(&config).await?);
                scout_sync::import_csv(&csv, &store).await?
            };
            print_import_summary(&summary);
        }
        Commands::Export { path } => {
            let store = PgVideoStore::new(connect(&config).await?);
            let rows = scout_sync::export_csv(&path, &store).await?;
            println!("exported {rows} videos to {}", path.display());
        }
        Commands::Migrate => {
            let pool = connect(&config).await?;
            scout_storage::apply_schema(&pool).await?;
            println!("schema applied");
        }
        Commands::ScheduleRun => {
            let report = ScheduledRunner::from_config(&config)?.run_once().await?;
            let job = &report.snapshot;
            println!(
                "job {} is {}: {}/{} search terms, {} videos saved",
                report.job_id,
                job.status,
                job.completed_search_terms,
                job.total_search_terms,
                job.total_videos_saved
            );
        }
        Commands::Daemon => {
            if !config.scheduler_enabled {
                bail!("SCOUT_SCHEDULER_ENABLED is not set; refusing to start the daemon");
            }
            let runner = Arc::new(ScheduledRunner::from_config(&config)?);
            let sched = scout_sync::build_scheduler(&config.schedule_cron, runner).await?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.schedule_cron, "scheduler running");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            info!("shutting down");
        }
        Commands::Cleanup { days } => {
            if days < 0 {
                bail!("--days must not be negative");
            }
            let jobs = PgJobStore::new(connect(&config).await?);
            let report = jobs.cleanup(days).await?;
            println!(
                "removed {} job logs and {} jobs older than {days} days",
                report.deleted_logs, report.deleted_jobs
            );
        }
    }

    Ok(())
}

async fn connect(config: &ScoutConfig) -> Result<scout_storage::PgPool> {
    let url = config.require_database_url()?;
    scout_storage::connect(url, config.database_ssl)
        .await
        .context("connecting to database")
}

fn print_import_summary(summary: &ImportSummary) {
    println!(
        "imported {} rows, skipped {}, {} videos in store",
        summary.imported_count, summary.skipped_count, summary.total_in_store
    );
    for video in &summary.top_videos {
        println!("  {:>10} views  {}  ({})", video.view_count, video.title, video.video_id);
    }
}
