use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{ApiResponse, BotApi, File, Message, Update, APK_MIME_TYPE};
use crate::error::{BotError, BotResult};

/// Slack added to the long-poll timeout so the HTTP layer never gives up
/// before Telegram answers.
const POLL_GRACE: Duration = Duration::from_secs(10);

pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> BotResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(TelegramClient {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> BotResult<T> {
        let status = response.status();
        let body = response.bytes().await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&body)
            .map_err(|e| BotError::Decode(format!("HTTP {status}: {e}")))?;
        envelope.into_result()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> BotResult<T> {
        debug!(method, "Calling Bot API");
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(&payload)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl BotApi for TelegramClient {
    async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> BotResult<Vec<Update>> {
        let mut payload = json!({
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }
        self.call("getUpdates", payload, timeout + POLL_GRACE).await
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> BotResult<Message> {
        self.call(
            "sendMessage",
            json!({ "chat_id": chat_id, "text": text }),
            Duration::from_secs(30),
        )
        .await
    }

    async fn get_file(&self, file_id: &str) -> BotResult<File> {
        self.call("getFile", json!({ "file_id": file_id }), Duration::from_secs(30))
            .await
    }

    async fn download_file(&self, file_path: &str, dest: &Path) -> BotResult<PathBuf> {
        let response = self
            .http
            .get(self.file_url(file_path))
            .timeout(Duration::from_secs(300))
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        debug!(bytes = bytes.len(), dest = %dest.display(), "Downloaded file");
        Ok(dest.to_path_buf())
    }

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> BotResult<Message> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.apk".to_string());

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(APK_MIME_TYPE)?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        debug!(method = "sendDocument", "Calling Bot API");
        let response = self
            .http
            .post(self.method_url("sendDocument"))
            .timeout(Duration::from_secs(300))
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }
}
