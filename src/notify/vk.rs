//! VK messages channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::Ad;
use crate::notify::format::vk_text;
use crate::notify::retry::{Reply, RetryPolicy, send_with_retries};
use crate::notify::Notifier;

const API_BASE: &str = "https://api.vk.com/method";
const API_VERSION: &str = "5.199";

/// Sends to one VK user (by id or short name) from a community token.
pub struct VkNotifier {
    client: Client,
    token: String,
    user_id: String,
    base_url: String,
    policy: RetryPolicy,
    name: String,
}

/// The `error` object of a VK API answer, if present.
fn api_error(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    let code = error.get("error_code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("error_msg")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error");
    Some(format!("VK API error {code}: {message}"))
}

/// `photo{owner_id}_{id}` from a `photos.saveMessagesPhoto` answer.
fn attachment_from(saved: &Value) -> Option<String> {
    let photo = saved.pointer("/response/0")?;
    let owner = photo.get("owner_id").and_then(Value::as_i64)?;
    let id = photo.get("id").and_then(Value::as_i64)?;
    Some(format!("photo{owner}_{id}"))
}

impl VkNotifier {
    pub fn new(
        token: impl Into<String>,
        user_id: impl Into<String>,
        base_url: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let user_id = user_id.into();
        Ok(Self {
            client,
            token: token.into(),
            name: format!("vk:{user_id}"),
            user_id,
            base_url: base_url.into(),
            policy,
        })
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let body: Value = self
            .client
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await?
            .json()
            .await?;
        match api_error(&body) {
            Some(message) => Err(AppError::notify(&self.name, message)),
            None => Ok(body),
        }
    }

    /// Upload an image for a message; any failure just drops the attachment.
    async fn upload_photo(&self, photo_url: &str) -> Option<String> {
        match self.try_upload_photo(photo_url).await {
            Ok(attachment) => Some(attachment),
            Err(e) => {
                log::warn!("[notify] {} photo upload failed: {}", self.name, e);
                None
            }
        }
    }

    async fn try_upload_photo(&self, photo_url: &str) -> Result<String> {
        let server = self
            .call("photos.getMessagesUploadServer", &[("v", API_VERSION)])
            .await?;
        let upload_url = server
            .pointer("/response/upload_url")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::notify(&self.name, "no upload_url"))?;

        let bytes = self.client.get(photo_url).send().await?.bytes().await?;
        let part = Part::bytes(bytes.to_vec())
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?;
        let uploaded: Value = self
            .client
            .post(upload_url)
            .multipart(Form::new().part("photo", part))
            .send()
            .await?
            .json()
            .await?;

        let field = |key: &str| match uploaded.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let photo = field("photo");
        if photo.is_empty() || photo == "[]" {
            return Err(AppError::notify(&self.name, "photo was not uploaded"));
        }
        let (server, hash) = (field("server"), field("hash"));

        let saved = self
            .call(
                "photos.saveMessagesPhoto",
                &[
                    ("photo", photo.as_str()),
                    ("server", server.as_str()),
                    ("hash", hash.as_str()),
                    ("v", API_VERSION),
                ],
            )
            .await?;
        attachment_from(&saved).ok_or_else(|| AppError::notify(&self.name, "no saved photo"))
    }

    async fn send(&self, message: &str, attachment: Option<&str>) -> Result<()> {
        let url = format!("{API_BASE}/messages.send");
        let mut params = vec![
            ("domain", self.user_id.as_str()),
            ("random_id", "0"),
            ("message", message),
            ("v", API_VERSION),
        ];
        if let Some(attachment) = attachment {
            params.push(("attachment", attachment));
        }

        let (client, url, token, params) = (&self.client, &url, &self.token, &params);
        let reply = send_with_retries(&self.name, &self.policy, move || async move {
            let response = client
                .post(url)
                .bearer_auth(token)
                .form(params)
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Ok(Reply { status, body })
        })
        .await?;

        let body: Value = serde_json::from_str(&reply.body).unwrap_or(Value::Null);
        if let Some(message) = api_error(&body) {
            return Err(AppError::notify(&self.name, message));
        }
        log::debug!("[notify] {} delivered", self.name);
        Ok(())
    }
}

#[async_trait]
impl Notifier for VkNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify_ad(&self, ad: &Ad) -> Result<()> {
        let attachment = match ad.first_image() {
            Some(url) => self.upload_photo(url).await,
            None => None,
        };
        self.send(&vk_text(ad, &self.base_url), attachment.as_deref())
            .await
    }

    async fn notify_message(&self, message: &str) -> Result<()> {
        self.send(message, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error() {
        let body = json!({"error": {"error_code": 901, "error_msg": "Can't send messages"}});
        assert_eq!(
            api_error(&body).as_deref(),
            Some("VK API error 901: Can't send messages")
        );
        assert!(api_error(&json!({"response": 1})).is_none());
    }

    #[test]
    fn test_attachment_from_saved_photo() {
        let saved = json!({"response": [{"owner_id": -5, "id": 77}]});
        assert_eq!(attachment_from(&saved).as_deref(), Some("photo-5_77"));
        assert!(attachment_from(&json!({"response": []})).is_none());
    }
}
