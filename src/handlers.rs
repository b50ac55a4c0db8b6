use crate::audio;
use crate::config;
use crate::db;
use crate::error::{PipelineError, StoreError};
use crate::ingest::{self, AudioSubmission};
use crate::model::{Job, JobStatus};
use crate::queue::QueueService;
use anyhow::Result;
use std::path::Path;
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::{info, instrument, warn};

const HELP: &str = "Send me a voice message or an audio file and I will transcribe and summarize it.\n\n\
/status <id> - show the state of a job\n\
/jobs - list your recent jobs\n\
/notion <token> <database_id> - save results to a Notion database\n\
/notion_off - stop saving to Notion\n\
/help - this message";

const RECENT_JOBS: i64 = 10;

/// Shared state for the update handler.
#[derive(Clone)]
pub struct BotContext {
    pub queue: QueueService,
    pub data_dir: String,
    pub telegram: config::Telegram,
    pub ffprobe_path: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Help,
    Status(Option<i64>),
    Jobs,
    Notion { token: &'a str, database_id: &'a str },
    NotionUsage,
    NotionOff,
    Unknown,
}

fn parse_command(text: &str) -> Option<Command<'_>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    let head = parts.next().unwrap_or_default();
    // Commands may arrive as `/status@my_bot` in group chats.
    let name = head.split('@').next().unwrap_or(head);
    let cmd = match name {
        "/start" | "/help" => Command::Help,
        "/status" => Command::Status(parts.next().and_then(|s| s.trim_start_matches('#').parse().ok())),
        "/jobs" => Command::Jobs,
        "/notion" => match (parts.next(), parts.next()) {
            (Some(token), Some(database_id)) => Command::Notion { token, database_id },
            _ => Command::NotionUsage,
        },
        "/notion_off" => Command::NotionOff,
        _ => Command::Unknown,
    };
    Some(cmd)
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Created => "created",
        JobStatus::Queued => "waiting in queue",
        JobStatus::Processing => "processing",
        JobStatus::Transcribed => "transcribed, summarizing",
        JobStatus::Summarized => "summarized, saving",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

fn render_status(job: &Job) -> String {
    let mut out = format!(
        "Job #{} ({}): {}",
        job.id,
        job.file_name,
        status_label(job.status)
    );
    if let Some(err) = job.error_message.as_deref() {
        out.push_str(&format!("\nError: {}", err));
    }
    if job.notion_page_id.is_some() {
        out.push_str("\nSaved to Notion");
    }
    out
}

fn render_jobs(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No jobs yet.".to_string();
    }
    let lines: Vec<String> = jobs
        .iter()
        .map(|j| {
            let mut line = format!(
                "#{} {} {}",
                j.id,
                j.created_at.format("%d.%m %H:%M"),
                status_label(j.status)
            );
            if j.duration_secs > 0.0 {
                line.push_str(&format!(" ({:.0}s)", j.duration_secs));
            }
            line
        })
        .collect();
    lines.join("\n")
}

#[derive(Debug)]
struct AudioAttachment {
    file_id: String,
    file_name: String,
    /// `None` when Telegram does not report one (documents).
    duration_secs: Option<f64>,
}

fn audio_attachment(msg: &Message) -> Option<AudioAttachment> {
    if let Some(voice) = msg.voice() {
        return Some(AudioAttachment {
            file_id: voice.file.id.clone(),
            file_name: format!("voice_{}.ogg", msg.id.0),
            duration_secs: Some(voice.duration as f64),
        });
    }
    if let Some(audio) = msg.audio() {
        return Some(AudioAttachment {
            file_id: audio.file.id.clone(),
            file_name: audio
                .file_name
                .clone()
                .unwrap_or_else(|| format!("audio_{}", msg.id.0)),
            duration_secs: Some(audio.duration as f64),
        });
    }
    if let Some(doc) = msg.document() {
        let is_audio = doc
            .mime_type
            .as_ref()
            .is_some_and(|m| m.essence_str().starts_with("audio/"));
        if is_audio {
            return Some(AudioAttachment {
                file_id: doc.file.id.clone(),
                file_name: doc
                    .file_name
                    .clone()
                    .unwrap_or_else(|| format!("document_{}", msg.id.0)),
                duration_secs: None,
            });
        }
    }
    None
}

#[instrument(skip_all)]
pub async fn handle_update(bot: &Bot, ctx: &BotContext, msg: &Message) -> Result<()> {
    let user = match msg.from() {
        Some(u) => u,
        None => return Ok(()),
    };

    let tg_user_id = user.id.0 as i64;
    if !ctx.telegram.is_allowed(tg_user_id) {
        warn!(tg_user_id, "ignoring message from user outside allow-list");
        return Ok(());
    }

    let username = user.username.as_deref();
    let full_name = format!(
        "{} {}",
        user.first_name,
        user.last_name.clone().unwrap_or_default()
    );
    let pool = ctx.queue.pool();
    let user_id =
        db::get_or_create_user(pool, tg_user_id, username, Some(full_name.trim())).await?;

    if let Some(text) = msg.text() {
        match parse_command(text) {
            Some(cmd) => handle_command(bot, ctx, msg, user_id, cmd).await?,
            None => {
                let _ = bot.send_message(msg.chat.id, HELP).await;
            }
        }
        return Ok(());
    }

    let Some(attachment) = audio_attachment(msg) else {
        let _ = bot
            .send_message(msg.chat.id, "Unsupported message type. Send a voice message or an audio file.")
            .await;
        return Ok(());
    };

    let path = download_file(bot, &ctx.data_dir, tg_user_id, msg.id.0, &attachment.file_id).await?;
    info!(tg_user_id, path = %path, "downloaded audio");

    let duration_secs = match attachment.duration_secs {
        Some(secs) => secs,
        None => match audio::probe_duration(&ctx.ffprobe_path, Path::new(&path)).await {
            Ok(secs) => secs,
            Err(err) => {
                warn!(?err, "could not read audio duration");
                0.0
            }
        },
    };

    let submission = AudioSubmission {
        user_id,
        audio_path: path,
        file_name: attachment.file_name,
        duration_secs,
    };
    let result = ingest::submit_audio(&ctx.queue, submission).await;
    if let Err(err) = &result {
        warn!(error = %err, "failed to submit audio");
    }
    let _ = bot.send_message(msg.chat.id, submission_reply(&result)).await;
    Ok(())
}

/// `StatusOutOfSync` means the item is already on the queue, so it is reported
/// as queued.
fn submission_reply(result: &Result<Job, PipelineError>) -> String {
    let queued = |id: i64| format!("Got it. Job #{} is queued; I will message you when it is done.", id);
    match result {
        Ok(job) => queued(job.id),
        Err(PipelineError::StatusOutOfSync { job_id, .. }) => queued(*job_id),
        Err(_) => "Failed to queue the audio. Please try again later.".to_string(),
    }
}

async fn handle_command(
    bot: &Bot,
    ctx: &BotContext,
    msg: &Message,
    user_id: i64,
    cmd: Command<'_>,
) -> Result<()> {
    let pool = ctx.queue.pool();
    let reply = match cmd {
        Command::Help => HELP.to_string(),
        Command::Status(None) => "Usage: /status <job id>".to_string(),
        Command::Status(Some(job_id)) => match db::get_job(pool, job_id).await {
            Ok(job) if job.user_id == user_id => render_status(&job),
            Ok(_) | Err(StoreError::NotFound { .. }) => format!("Job #{} not found.", job_id),
            Err(err) => return Err(err.into()),
        },
        Command::Jobs => {
            let jobs = db::jobs_for_user(pool, user_id, RECENT_JOBS, 0).await?;
            render_jobs(&jobs)
        }
        Command::Notion { token, database_id } => {
            db::set_notion_credentials(pool, user_id, token, database_id).await?;
            // The message carries the token; drop it from the chat history.
            if let Err(err) = bot.delete_message(msg.chat.id, msg.id).await {
                warn!(?err, "failed to delete message with Notion token");
            }
            info!(user_id, "notion credentials configured");
            "Notion integration enabled. New results will be saved to your database.".to_string()
        }
        Command::NotionUsage => "Usage: /notion <integration token> <database id>".to_string(),
        Command::NotionOff => {
            db::clear_notion_credentials(pool, user_id).await?;
            "Notion integration disabled.".to_string()
        }
        Command::Unknown => "Unknown command. Try /help.".to_string(),
    };
    let _ = bot.send_message(msg.chat.id, reply).await;
    Ok(())
}

async fn download_file(
    bot: &Bot,
    data_dir: &str,
    tg_user_id: i64,
    msg_id: i32,
    file_id: &str,
) -> Result<String> {
    // Resolve file path from Telegram API, then download to local storage
    let file = bot.get_file(file_id).await?;
    let dir = format!("{}/media/{}/", data_dir, tg_user_id);
    tokio::fs::create_dir_all(&dir).await?;
    let ext = std::path::Path::new(&file.path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("ogg");
    let path = format!("{}{}_{}.{}", dir, msg_id, file.meta.unique_id, ext);
    let mut dst = tokio::fs::File::create(&path).await?;
    bot.download_file(&file.path, &mut dst).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn command_parsing() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/start"), Some(Command::Help));
        assert_eq!(parse_command("/status 12"), Some(Command::Status(Some(12))));
        assert_eq!(parse_command("/status #7"), Some(Command::Status(Some(7))));
        assert_eq!(parse_command("/status abc"), Some(Command::Status(None)));
        assert_eq!(parse_command("/jobs@voice_bot"), Some(Command::Jobs));
        assert_eq!(
            parse_command("/notion secret_x db-1"),
            Some(Command::Notion {
                token: "secret_x",
                database_id: "db-1"
            })
        );
        assert_eq!(parse_command("/notion secret_x"), Some(Command::NotionUsage));
        assert_eq!(parse_command("/notion_off"), Some(Command::NotionOff));
        assert_eq!(parse_command("/nope"), Some(Command::Unknown));
    }

    fn job(status: JobStatus) -> Job {
        Job {
            id: 5,
            user_id: 1,
            status,
            audio_file_path: "a.ogg".into(),
            file_name: "a.ogg".into(),
            duration_secs: 12.4,
            transcription: None,
            summary: None,
            notion_page_id: None,
            notion_database_id: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn status_rendering() {
        let mut j = job(JobStatus::Failed);
        j.error_message = Some("transcriber failed: 500".into());
        let text = render_status(&j);
        assert!(text.starts_with("Job #5 (a.ogg): failed"));
        assert!(text.contains("Error: transcriber failed: 500"));

        let text = render_status(&job(JobStatus::Queued));
        assert_eq!(text, "Job #5 (a.ogg): waiting in queue");
    }

    #[test]
    fn jobs_rendering() {
        assert_eq!(render_jobs(&[]), "No jobs yet.");
        let text = render_jobs(&[job(JobStatus::Completed)]);
        assert!(text.starts_with("#5 "));
        assert!(text.ends_with("completed (12s)"));

        let mut unknown = job(JobStatus::Queued);
        unknown.duration_secs = 0.0;
        assert!(render_jobs(&[unknown]).ends_with("waiting in queue"));
    }

    #[test]
    fn published_job_is_reported_queued_despite_status_failure() {
        let out_of_sync: Result<Job, PipelineError> = Err(PipelineError::StatusOutOfSync {
            job_id: 9,
            status: JobStatus::Queued,
            source: StoreError::job_not_found(9),
        });
        assert!(submission_reply(&out_of_sync).starts_with("Got it. Job #9 is queued"));

        let ok: Result<Job, PipelineError> = Ok(job(JobStatus::Created));
        assert!(submission_reply(&ok).starts_with("Got it. Job #5 is queued"));

        let failed: Result<Job, PipelineError> = Err(StoreError::user_not_found(1).into());
        assert_eq!(
            submission_reply(&failed),
            "Failed to queue the audio. Please try again later."
        );
    }
}
