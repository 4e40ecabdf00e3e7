//! Telegram Bot API channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::Result;
use crate::models::Ad;
use crate::notify::format::{escape_markdown_v2, telegram_caption};
use crate::notify::retry::{Reply, RetryPolicy, send_with_retries};
use crate::notify::Notifier;

const API_BASE: &str = "https://api.telegram.org";

/// Sends to one chat through a bot.
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
    base_url: String,
    policy: RetryPolicy,
    name: String,
}

impl TelegramNotifier {
    pub fn new(
        token: impl Into<String>,
        chat_id: impl Into<String>,
        base_url: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let chat_id = chat_id.into();
        Ok(Self {
            client,
            token: token.into(),
            name: format!("telegram:{chat_id}"),
            chat_id,
            base_url: base_url.into(),
            policy,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.token)
    }

    async fn post(&self, method: &str, payload: serde_json::Value) -> Result<Reply> {
        let url = self.method_url(method);
        let (client, url, payload) = (&self.client, &url, &payload);
        send_with_retries(&self.name, &self.policy, move || async move {
            let response = client.post(url).json(payload).send().await?;
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Ok(Reply { status, body })
        })
        .await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify_ad(&self, ad: &Ad) -> Result<()> {
        let caption = telegram_caption(ad, &self.base_url);
        match ad.first_image() {
            Some(photo) => {
                self.post(
                    "sendPhoto",
                    json!({
                        "chat_id": self.chat_id,
                        "caption": caption,
                        "photo": photo,
                        "parse_mode": "MarkdownV2",
                    }),
                )
                .await?;
            }
            None => {
                self.post(
                    "sendMessage",
                    json!({
                        "chat_id": self.chat_id,
                        "text": caption,
                        "parse_mode": "MarkdownV2",
                        "disable_web_page_preview": true,
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn notify_message(&self, message: &str) -> Result<()> {
        self.post(
            "sendMessage",
            json!({
                "chat_id": self.chat_id,
                "text": escape_markdown_v2(message),
                "parse_mode": "MarkdownV2",
            }),
        )
        .await?;
        Ok(())
    }
}
