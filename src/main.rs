use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tg_voicenotes::audio::{self, Ffmpeg};
use tg_voicenotes::config::{self, QueueBackend};
use tg_voicenotes::db;
use tg_voicenotes::handlers::{self, BotContext};
use tg_voicenotes::notify::TelegramNotifier;
use tg_voicenotes::notion::NotionClient;
use tg_voicenotes::pipeline::{self, Collaborators};
use tg_voicenotes::queue::{MemoryQueue, QueueService, SqliteQueue, WorkQueue};
use tg_voicenotes::summarize::ChatSummarizer;
use tg_voicenotes::transcribe::WhisperClient;
use tg_voicenotes::worker::{HandlerRegistry, WorkerSettings};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    if let Err(err) = audio::ensure_ffmpeg_available(&cfg.ffmpeg.binary_path).await {
        warn!(?err, "ffmpeg check failed; transcription jobs will fail until it is installed");
    }

    let work_queue: Arc<dyn WorkQueue> = match cfg.queue.backend {
        QueueBackend::Sqlite => Arc::new(SqliteQueue::new(
            pool.clone(),
            cfg.queue.pop_timeout(),
            cfg.queue.poll_interval(),
        )),
        QueueBackend::Memory => Arc::new(MemoryQueue::new(cfg.queue.pop_timeout())),
    };
    let queue = QueueService::new(work_queue, pool.clone());

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let collaborators = Collaborators {
        transcoder: Arc::new(Ffmpeg::new(cfg.ffmpeg.binary_path.clone())),
        transcriber: Arc::new(WhisperClient::from_config(&cfg)?),
        summarizer: Arc::new(ChatSummarizer::from_config(&cfg)?),
        notion: Arc::new(NotionClient::from_config(&cfg)?),
        notifier: Arc::new(TelegramNotifier::new(bot.clone())),
    };

    let mut registry = HandlerRegistry::new();
    pipeline::register_stages(&mut registry, &queue, &collaborators);
    let worker = queue.start_worker(
        registry,
        WorkerSettings::from(&cfg.worker),
        CancellationToken::new(),
    );

    let ctx = BotContext {
        queue: queue.clone(),
        data_dir: cfg.app.data_dir.clone(),
        telegram: cfg.telegram.clone(),
        ffprobe_path: cfg.ffmpeg.ffprobe_path.clone(),
    };

    info!("starting telegram bot");
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let ctx = ctx.clone();
        async move {
            if let Err(err) = handlers::handle_update(&bot, &ctx, &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    info!("bot stopped; waiting for the worker");
    worker.stop().await;
    Ok(())
}
