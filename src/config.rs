//! Configuration loader and validator for the voice-note pipeline bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub worker: Worker,
    pub telegram: Telegram,
    pub openai: OpenAi,
    pub summarizer: Summarizer,
    #[serde(default)]
    pub notion: Notion,
    #[serde(default)]
    pub ffmpeg: Ffmpeg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// `queue_items` table in the application database.
    #[default]
    Sqlite,
    /// Process-local; queued work is lost on restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Queue {
    pub backend: QueueBackend,
    /// Upper bound for one blocking pop.
    pub pop_timeout_ms: u64,
    /// How often the SQLite backend re-checks for items while blocked.
    pub poll_interval_ms: u64,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Sqlite,
            pop_timeout_ms: 1000,
            poll_interval_ms: 100,
        }
    }
}

impl Queue {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Worker {
    /// Sleep after an empty pop.
    pub idle_sleep_ms: u64,
    /// Handler runs allowed in flight at once.
    pub concurrency: usize,
    /// Mark the owning job `failed` when a handler returns an error.
    pub fail_jobs_on_error: bool,
}

impl Default for Worker {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 1000,
            concurrency: 1,
            fail_jobs_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

impl Telegram {
    /// An empty allow-list admits everyone.
    pub fn is_allowed(&self, tg_user_id: i64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&tg_user_id)
    }
}

/// Speech-to-text endpoint (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAi {
    pub api_key: String,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Chat-completion endpoint used for summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summarizer {
    pub api_key: String,
    #[serde(default = "default_summarizer_base")]
    pub base_url: String,
    #[serde(default = "default_summarizer_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Notion {
    pub version: String,
    /// Title property of the target database.
    pub title_property: String,
}

impl Default for Notion {
    fn default() -> Self {
        Self {
            version: "2022-06-28".into(),
            title_property: "Name".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Ffmpeg {
    pub binary_path: String,
    /// Used to read the duration of audio sent as a plain document.
    pub ffprobe_path: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
        }
    }
}

fn default_openai_base() -> String {
    "https://api.openai.com/".into()
}

fn default_whisper_model() -> String {
    "whisper-1".into()
}

fn default_summarizer_base() -> String {
    "https://api.deepseek.com/".into()
}

fn default_summarizer_model() -> String {
    "deepseek-chat".into()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/voicenotes.db", self.app.data_dir))
    }

    /// Secrets may come from the environment instead of the YAML file.
    fn apply_env_overrides(&mut self) {
        apply_env(&mut self.telegram.bot_token, "TELEGRAM_TOKEN");
        apply_env(&mut self.openai.api_key, "OPENAI_API_KEY");
        apply_env(&mut self.summarizer.api_key, "SUMMARIZER_API_KEY");
    }
}

fn apply_env(target: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if !value.trim().is_empty() {
            *target = value;
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.queue.pop_timeout_ms == 0 {
        return Err(ConfigError::Invalid("queue.pop_timeout_ms must be > 0"));
    }
    if cfg.queue.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("queue.poll_interval_ms must be > 0"));
    }
    if cfg.worker.concurrency == 0 {
        return Err(ConfigError::Invalid("worker.concurrency must be > 0"));
    }
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.openai.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("openai.api_key must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.openai.base_url).is_err() {
        return Err(ConfigError::Invalid("openai.base_url must be a valid URL"));
    }
    if cfg.summarizer.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("summarizer.api_key must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.summarizer.base_url).is_err() {
        return Err(ConfigError::Invalid("summarizer.base_url must be a valid URL"));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }
    if cfg.notion.title_property.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.title_property must be non-empty"));
    }
    if cfg.ffmpeg.binary_path.trim().is_empty() {
        return Err(ConfigError::Invalid("ffmpeg.binary_path must be non-empty"));
    }
    Ok(())
}

/// Example configuration accepted by `load`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

queue:
  backend: sqlite
  pop_timeout_ms: 1000
  poll_interval_ms: 100

worker:
  idle_sleep_ms: 1000
  concurrency: 1
  fail_jobs_on_error: true

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  allowed_users:
    - 123456789

openai:
  api_key: "YOUR_OPENAI_API_KEY"
  base_url: "https://api.openai.com/"
  model: "whisper-1"
  timeout_secs: 120

summarizer:
  api_key: "YOUR_DEEPSEEK_API_KEY"
  base_url: "https://api.deepseek.com/"
  model: "deepseek-chat"
  timeout_secs: 60

notion:
  version: "2022-06-28"
  title_property: "Name"

ffmpeg:
  binary_path: "ffmpeg"
  ffprobe_path: "ffprobe"
"#
}
