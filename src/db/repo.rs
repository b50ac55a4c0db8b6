use super::model::{JobRow, UserRow};
use crate::error::StoreError;
use crate::model::{Job, JobStatus, NewJob, User};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;
pub type StoreResult<T> = Result<T, StoreError>;

const JOB_COLUMNS: &str = "id, user_id, status, audio_file_path, file_name, duration_secs, \
     transcription, summary, notion_page_id, notion_database_id, error_message, \
     created_at, updated_at, completed_at";

const USER_COLUMNS: &str = "id, tg_user_id, username, full_name, notion_token, \
     notion_database_id, created_at, updated_at";

pub async fn init_pool(database_url: &str) -> anyhow::Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePoolOptions::new().connect(&normalized).await?;
    // WAL keeps readers (bot commands) off the worker's write path.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    if !rebuilt.contains("mode=") {
        rebuilt.push(if query_part.is_some() { '&' } else { '?' });
        rebuilt.push_str("mode=rwc");
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn get_or_create_user(
    pool: &Pool,
    tg_user_id: i64,
    username: Option<&str>,
    full_name: Option<&str>,
) -> StoreResult<i64> {
    if let Some(id) = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE tg_user_id = ?")
        .bind(tg_user_id)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    let now = Utc::now();
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO users (tg_user_id, username, full_name, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(tg_user_id)
    .bind(username)
    .bind(full_name)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_user(pool: &Pool, id: i64) -> StoreResult<User> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::user_not_found(id))?;
    Ok(row.into())
}

#[instrument(skip_all)]
pub async fn find_user_by_tg_id(pool: &Pool, tg_user_id: i64) -> StoreResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tg_user_id = ?");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(tg_user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(User::from))
}

#[instrument(skip_all)]
pub async fn set_notion_credentials(
    pool: &Pool,
    user_id: i64,
    token: &str,
    database_id: &str,
) -> StoreResult<()> {
    let res = sqlx::query(
        "UPDATE users SET notion_token = ?, notion_database_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(token)
    .bind(database_id)
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::user_not_found(user_id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn clear_notion_credentials(pool: &Pool, user_id: i64) -> StoreResult<()> {
    let res = sqlx::query(
        "UPDATE users SET notion_token = NULL, notion_database_id = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::user_not_found(user_id));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

/// Persist a new job. The initial status is always `created`, whatever the
/// caller intends to do next.
#[instrument(skip_all, fields(user_id = new.user_id))]
pub async fn create_job(pool: &Pool, new: NewJob) -> StoreResult<Job> {
    let user_exists = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = ?")
        .bind(new.user_id)
        .fetch_optional(pool)
        .await?
        .is_some();
    if !user_exists {
        return Err(StoreError::InvalidUser(new.user_id));
    }

    let now = Utc::now();
    let sql = format!(
        "INSERT INTO jobs (user_id, status, audio_file_path, file_name, duration_secs, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {JOB_COLUMNS}"
    );
    let row = sqlx::query_as::<_, JobRow>(&sql)
        .bind(new.user_id)
        .bind(JobStatus::Created.as_str())
        .bind(&new.audio_file_path)
        .bind(&new.file_name)
        .bind(new.duration_secs)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;
    Job::try_from(row)
}

#[instrument(skip_all)]
pub async fn get_job(pool: &Pool, id: i64) -> StoreResult<Job> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
    let row = sqlx::query_as::<_, JobRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::job_not_found(id))?;
    Job::try_from(row)
}

/// Jobs of one user, newest first.
#[instrument(skip_all)]
pub async fn jobs_for_user(
    pool: &Pool,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> StoreResult<Vec<Job>> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query_as::<_, JobRow>(&sql)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(Job::try_from).collect()
}

/// Overwrite the status of a job. Transitions are not validated.
///
/// Entering a terminal status stamps `completed_at` unless it is already set;
/// any other status clears it. `error_message` is only kept for `failed`.
#[instrument(skip_all, fields(job_id = id, status = %status))]
pub async fn update_job_status(
    pool: &Pool,
    id: i64,
    status: JobStatus,
    error_message: Option<&str>,
) -> StoreResult<()> {
    let now = Utc::now();
    let error_message = error_message
        .map(str::trim)
        .filter(|m| status == JobStatus::Failed && !m.is_empty());
    let res = sqlx::query(
        "UPDATE jobs SET status = ?, updated_at = ?, \
             completed_at = CASE WHEN ? THEN COALESCE(completed_at, ?) ELSE NULL END, \
             error_message = ? \
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(now)
    .bind(status.is_terminal())
    .bind(now)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::job_not_found(id));
    }
    Ok(())
}

#[instrument(skip_all, fields(job_id = id))]
pub async fn set_transcription(pool: &Pool, id: i64, text: &str) -> StoreResult<()> {
    let res = sqlx::query("UPDATE jobs SET transcription = ?, updated_at = ? WHERE id = ?")
        .bind(text)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::job_not_found(id));
    }
    Ok(())
}

#[instrument(skip_all, fields(job_id = id))]
pub async fn set_summary(pool: &Pool, id: i64, text: &str) -> StoreResult<()> {
    let res = sqlx::query("UPDATE jobs SET summary = ?, updated_at = ? WHERE id = ?")
        .bind(text)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::job_not_found(id));
    }
    Ok(())
}

#[instrument(skip_all, fields(job_id = id))]
pub async fn set_sync_ids(
    pool: &Pool,
    id: i64,
    page_id: &str,
    database_id: &str,
) -> StoreResult<()> {
    let res = sqlx::query(
        "UPDATE jobs SET notion_page_id = ?, notion_database_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(page_id)
    .bind(database_id)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::job_not_found(id));
    }
    Ok(())
}
