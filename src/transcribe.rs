use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::Config;

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String>;
}

/// OpenAI-compatible `audio/transcriptions` client.
#[derive(Clone)]
pub struct WhisperClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl fmt::Debug for WhisperClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhisperClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl WhisperClient {
    pub fn new(
        base_url: Url,
        api_key: String,
        model: String,
        language: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("tg-voicenotes/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build transcription HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            language,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.openai.base_url).context("invalid openai.base_url")?;
        Self::new(
            base_url,
            cfg.openai.api_key.clone(),
            cfg.openai.model.clone(),
            cfg.openai.language.clone(),
            Duration::from_secs(cfg.openai.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> Result<Url> {
        self.base_url
            .join("v1/audio/transcriptions")
            .context("invalid transcription base URL")
    }

    fn form(&self, file_name: String, bytes: Vec<u8>) -> Result<Form> {
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;
        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", part);
        if let Some(lang) = self.language.as_ref().filter(|l| !l.is_empty()) {
            form = form.text("language", lang.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, audio: &Path) -> Result<String> {
        let bytes = tokio::fs::read(audio)
            .await
            .with_context(|| format!("failed to read audio file: {}", audio.display()))?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();
        info!(file = %file_name, bytes = bytes.len(), model = %self.model, "transcribing audio");

        let res = self
            .http
            .post(self.endpoint()?)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(self.form(file_name, bytes)?)
            .send()
            .await
            .context("failed to reach transcription API")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("transcription API error {}: {}", status, body));
        }
        let parsed: TranscriptionResponse = res
            .json()
            .await
            .context("invalid transcription response JSON")?;
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> WhisperClient {
        WhisperClient::new(
            Url::parse(base).unwrap(),
            "sk-test".into(),
            "whisper-1".into(),
            Some("ru".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(
            client("https://api.openai.com/").endpoint().unwrap().as_str(),
            "https://api.openai.com/v1/audio/transcriptions"
        );
        assert_eq!(
            client("http://localhost:9000/proxy/")
                .endpoint()
                .unwrap()
                .path(),
            "/proxy/v1/audio/transcriptions"
        );
    }

    #[test]
    fn debug_omits_api_key() {
        let dbg = format!("{:?}", client("https://api.openai.com/"));
        assert!(!dbg.contains("sk-test"));
        assert!(dbg.contains("whisper-1"));
    }

    #[tokio::test]
    async fn unreadable_file_is_an_error() {
        let err = client("https://api.openai.com/")
            .transcribe(Path::new("/nonexistent/a.wav"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read audio file"));
    }
}
