use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tg_voicenotes::config::{Config, QueueBackend};
use tg_voicenotes::db;
use tg_voicenotes::model::JobType;
use tg_voicenotes::queue::{SqliteQueue, WorkQueue, DEFAULT_QUEUE};

#[derive(Parser, Debug)]
#[command(about = "Print queue depths and job state from the bot database")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Show a single job
    #[arg(long)]
    job: Option<i64>,

    /// List recent jobs of a Telegram user id
    #[arg(long)]
    tg_user: Option<i64>,

    /// Number of jobs to list with --tg-user
    #[arg(long, default_value = "20")]
    limit: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    // Read-only tool: API secrets are not required, so the file is not validated.
    let raw = fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let cfg: Config = serde_yaml::from_str(&raw)?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    if let Some(job_id) = args.job {
        let job = db::get_job(&pool, job_id).await?;
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    if let Some(tg_user_id) = args.tg_user {
        let Some(user) = db::find_user_by_tg_id(&pool, tg_user_id).await? else {
            println!("No user with Telegram id {}", tg_user_id);
            return Ok(());
        };
        for job in db::jobs_for_user(&pool, user.id, args.limit, 0).await? {
            println!(
                "#{:<6} {:<12} {} {}",
                job.id,
                job.status.as_str(),
                job.created_at.format("%Y-%m-%d %H:%M:%S"),
                job.file_name
            );
        }
        return Ok(());
    }

    if cfg.queue.backend == QueueBackend::Memory {
        println!("queue.backend is memory; queue contents live only inside the bot process");
        return Ok(());
    }
    let queue = SqliteQueue::new(pool, Duration::from_millis(1), Duration::from_millis(1));
    let names = JobType::ALL
        .iter()
        .map(|t| t.queue_name())
        .chain(std::iter::once(DEFAULT_QUEUE));
    println!("Queue depths:");
    for name in names {
        println!("  {:<14} {}", name, queue.size(name).await?);
    }
    Ok(())
}
