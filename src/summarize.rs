use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::config::Config;

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// Chat-completion summarizer for DeepSeek or any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatSummarizer {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl fmt::Debug for ChatSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSummarizer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

pub fn summary_prompt(text: &str) -> String {
    format!(
        "Write a short, informative summary of the following text. \
         Keep the key ideas, facts and conclusions. Reply in the language of the text.\n\nText: {}",
        text
    )
}

impl ChatSummarizer {
    pub fn new(base_url: Url, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("tg-voicenotes/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build summarizer HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url =
            Url::parse(&cfg.summarizer.base_url).context("invalid summarizer.base_url")?;
        Self::new(
            base_url,
            cfg.summarizer.api_key.clone(),
            cfg.summarizer.model.clone(),
            Duration::from_secs(cfg.summarizer.timeout_secs),
        )
    }

    fn request_body(&self, text: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: summary_prompt(text),
            }],
            max_tokens: 1000,
            temperature: 0.3,
        }
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        info!(chars = text.chars().count(), model = %self.model, "summarizing text");
        let url = self
            .base_url
            .join("chat/completions")
            .context("invalid summarizer base URL")?;
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .context("failed to reach summarization API")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("summarization API error {}: {}", status, body));
        }
        let parsed: ChatResponse = res
            .json()
            .await
            .context("invalid summarization response JSON")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| anyhow!("summarization response has no choices"))
    }
}
