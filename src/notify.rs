use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;

/// Delivers a text message to a chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, chat_id: i64, message: &str) -> Result<()>;
}

pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, chat_id: i64, message: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), message)
            .await
            .with_context(|| format!("failed to send message to chat {}", chat_id))?;
        Ok(())
    }
}
