use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use croncall::config::{CroncallConfig, LogFormat, LoggingConfig};
use croncall::job::JobId;
use croncall::storage::{JobStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "croncall",
    about = "Call HTTP endpoints on cron schedules",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler + workers)
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Manage stored jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List all jobs
    List,

    /// Add a new job (picked up by the daemon on its next start)
    Add {
        /// Cron expression (5 or 6 fields, UTC)
        #[arg(long)]
        schedule: String,

        /// Endpoint URL to call
        #[arg(long)]
        target: String,

        /// Job type tag
        #[arg(long, default_value = "http")]
        kind: String,
    },

    /// Show recent executions of a job
    Executions {
        /// Job identifier
        job_id: String,

        /// Number of executions to show
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CroncallConfig::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting croncall daemon");
            croncall::serve(&config).await?;
        }
        Commands::Jobs { action } => {
            let db_path = config.storage.db_path.to_string_lossy().into_owned();
            let store = SqliteStore::new(croncall::storage::open_pool(&db_path)?);

            match action {
                JobsAction::List => {
                    let jobs = store.list_jobs().await?;
                    if jobs.is_empty() {
                        println!("No jobs found.");
                    } else {
                        println!("{:<36} | {:<15} | {:<8} | Target", "ID", "Schedule", "Type");
                        println!("{:-<36}-|-{:-<15}-|-{:-<8}-|-{:-<30}", "", "", "", "");
                        for job in jobs {
                            println!(
                                "{:<36} | {:<15} | {:<8} | {}",
                                job.id, job.schedule, job.kind, job.target
                            );
                        }
                    }
                }
                JobsAction::Add {
                    schedule,
                    target,
                    kind,
                } => {
                    croncall::scheduler::parse_schedule(&schedule)?;
                    let job = store
                        .create_job(&schedule, &target, &kind)
                        .await
                        .context("Failed to create job")?;
                    println!("Job '{}' added.", job.id);
                }
                JobsAction::Executions { job_id, limit } => {
                    let job_id = JobId::from(job_id);
                    let records = store.recent_executions(&job_id, limit).await?;
                    if records.is_empty() {
                        println!("No executions recorded for job '{}'.", job_id);
                    } else {
                        println!("{:<25} | {:<6} | {:<10} | Success", "Executed at", "Status", "Duration");
                        println!("{:-<25}-|-{:-<6}-|-{:-<10}-|-{:-<7}", "", "", "", "");
                        for r in records {
                            let status = r
                                .status_code
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "-".to_string());
                            println!(
                                "{:<25} | {:<6} | {:<10} | {}",
                                r.executed_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                                status,
                                format!("{}ms", r.duration_ms),
                                r.success
                            );
                        }
                    }
                }
                JobsAction::DryRun { hours } => {
                    let jobs = store.list_jobs().await?;
                    let now = chrono::Utc::now();
                    let end = now + chrono::Duration::hours(hours.min(24 * 366) as i64);
                    let runs = croncall::scheduler::preview(&jobs, now, end);
                    if runs.is_empty() {
                        println!("No runs scheduled in next {} hours.", hours);
                    } else {
                        println!("Upcoming runs (next {} hours):", hours);
                        for (time, job) in runs {
                            println!("{} : {} ({})", time.to_rfc3339(), job.id, job.target);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
