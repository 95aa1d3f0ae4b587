//! The slice of the Telegram Bot API this bot talks to.

mod client;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{BotError, BotResult};

pub use client::TelegramClient;

pub const APK_MIME_TYPE: &str = "application/vnd.android.package-archive";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i32>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> BotResult<T> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(BotError::Decode("`ok` response without `result`".to_string())),
            (false, _) => Err(BotError::Api {
                code: self.error_code,
                description: self
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub document: Option<Document>,
}

impl Message {
    pub fn sender_id(&self) -> Option<i64> {
        self.from.as_ref().map(|user| user.id)
    }

    /// The bot command in `text`, without its `@botname` suffix.
    pub fn command(&self) -> Option<&str> {
        let first = self.text.as_deref()?.split_whitespace().next()?;
        let command = first.strip_prefix('/')?;
        Some(command.split('@').next().unwrap_or(command))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

impl Document {
    pub fn is_apk(&self) -> bool {
        self.mime_type.as_deref() == Some(APK_MIME_TYPE)
            || self
                .file_name
                .as_deref()
                .is_some_and(|name| name.to_ascii_lowercase().ends_with(".apk"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}

#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> BotResult<Vec<Update>>;

    async fn send_message(&self, chat_id: i64, text: &str) -> BotResult<Message>;

    async fn get_file(&self, file_id: &str) -> BotResult<File>;

    /// Fetches `file_path` (as returned by `getFile`) into `dest`.
    async fn download_file(&self, file_path: &str, dest: &Path) -> BotResult<PathBuf>;

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> BotResult<Message>;
}
