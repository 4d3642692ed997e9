use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::time::sleep;

use tga_core::{errors::Error, ports::Notifier, Result};

/// Bot API hard limit for a single text message, in characters.
const MAX_MESSAGE_LEN: usize = 4096;

/// Posts run summaries to a fixed chat through a bot.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
        }
    }

    pub fn from_token(token: &str, chat_id: i64) -> Self {
        Self::new(Bot::new(token), chat_id)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let body = clamp_message(text);
        self.with_retry(|| self.bot.send_message(self.chat_id, body.clone()))
            .await?;
        Ok(())
    }
}

/// Long summaries are cut to what one message can carry.
fn clamp_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_MESSAGE_LEN - 1).collect();
    out.push('…');
    out
}
