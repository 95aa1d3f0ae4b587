//! Per-update logic: owner gate, APK intake, progress relay, delivery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};
use veil_packer::{Artifact, Pipeline, Stage};

use crate::error::{BotError, BotResult};
use crate::telegram::{BotApi, Document, Message, Update};

pub const START_TEXT: &str =
    "👋 Hi! Send me an APK, and I'll process it with QuantumVeil protection automatically.";
pub const UNAUTHORIZED_TEXT: &str = "❌ Sorry, only the admin can use this bot!";
pub const NOT_APK_TEXT: &str = "⚠️ Please send a valid APK file!";
pub const DOWNLOAD_FAILED_TEXT: &str = "⚠️ Error: Failed to download APK!";
pub const RECEIVED_TEXT: &str = "✅ Got your APK! Processing now...";
pub const MISSING_OUTPUT_TEXT: &str = "⚠️ Error: Processed APK not found!";
pub const DELIVERY_CAPTION: &str = "✅ Here's your QuantumVeil-protected APK!";

/// The signed APK handed back by a [`Processor`], plus whatever must be
/// removed once it has been sent.
pub struct Processed {
    pub signed_apk: PathBuf,
    pub key_file: Option<PathBuf>,
    artifact: Option<Artifact>,
}

impl Processed {
    pub fn new(signed_apk: PathBuf) -> Self {
        Processed {
            signed_apk,
            key_file: None,
            artifact: None,
        }
    }

    pub fn cleanup(self) {
        if self.signed_apk.exists() {
            if let Err(error) = std::fs::remove_file(&self.signed_apk) {
                warn!(file = %self.signed_apk.display(), %error, "Failed to remove signed APK");
            }
        }
        if let Some(artifact) = self.artifact {
            artifact.cleanup();
        }
    }
}

impl From<Artifact> for Processed {
    fn from(artifact: Artifact) -> Self {
        Processed {
            signed_apk: artifact.signed_apk.clone(),
            key_file: Some(artifact.key_file.clone()),
            artifact: Some(artifact),
        }
    }
}

#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, input: PathBuf, progress: mpsc::UnboundedSender<Stage>) -> BotResult<Processed>;
}

/// Runs the packer pipeline on the blocking pool.
pub struct PipelineProcessor {
    pipeline: Arc<Pipeline>,
}

impl PipelineProcessor {
    pub fn new(pipeline: Pipeline) -> Self {
        PipelineProcessor {
            pipeline: Arc::new(pipeline),
        }
    }
}

#[async_trait]
impl Processor for PipelineProcessor {
    async fn process(&self, input: PathBuf, progress: mpsc::UnboundedSender<Stage>) -> BotResult<Processed> {
        let pipeline = Arc::clone(&self.pipeline);
        let artifact = tokio::task::spawn_blocking(move || {
            pipeline.run(&input, |stage| {
                let _ = progress.send(stage);
            })
        })
        .await
        .map_err(|e| BotError::Worker(e.to_string()))??;
        Ok(artifact.into())
    }
}

pub struct Handler {
    api: Arc<dyn BotApi>,
    processor: Arc<dyn Processor>,
    owner_id: i64,
    incoming_dir: PathBuf,
}

impl Handler {
    pub fn new(
        api: Arc<dyn BotApi>,
        processor: Arc<dyn Processor>,
        owner_id: i64,
        incoming_dir: impl Into<PathBuf>,
    ) -> Self {
        Handler {
            api,
            processor,
            owner_id,
            incoming_dir: incoming_dir.into(),
        }
    }

    pub async fn handle_update(&self, update: Update) -> BotResult<()> {
        let Some(message) = update.message else {
            return Ok(());
        };
        let user_id = message.sender_id();
        let span = info_span!("update", update_id = update.update_id, user_id = ?user_id);
        self.handle_message(message).instrument(span).await
    }

    async fn handle_message(&self, message: Message) -> BotResult<()> {
        let chat_id = message.chat.id;

        if message.sender_id() != Some(self.owner_id) {
            warn!(user_id = ?message.sender_id(), "Unauthorized access");
            self.api.send_message(chat_id, UNAUTHORIZED_TEXT).await?;
            return Ok(());
        }

        if let Some(command) = message.command() {
            if matches!(command, "start" | "help") {
                self.api.send_message(chat_id, START_TEXT).await?;
            }
            return Ok(());
        }

        match &message.document {
            Some(document) if document.is_apk() => self.handle_apk(&message, document).await,
            Some(document) => {
                info!(mime = ?document.mime_type, name = ?document.file_name, "Rejected non-APK document");
                self.api.send_message(chat_id, NOT_APK_TEXT).await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn handle_apk(&self, message: &Message, document: &Document) -> BotResult<()> {
        let chat_id = message.chat.id;
        let dest = self
            .incoming_dir
            .join(format!("{}.apk", sanitize(&document.file_unique_id)));

        let input = match self.download(document, &dest).await {
            Ok(path) => path,
            Err(error) => {
                error!(%error, "Download failed");
                remove_quietly(&dest).await;
                self.api.send_message(chat_id, DOWNLOAD_FAILED_TEXT).await?;
                return Ok(());
            }
        };

        info!(input = %input.display(), size = ?document.file_size, "Received APK");
        self.api.send_message(chat_id, RECEIVED_TEXT).await?;

        let outcome = self.run_pipeline(chat_id, input.clone()).await;
        let outcome = match outcome {
            Ok(processed) => self.deliver(message, processed).await,
            Err(error) => Err(error),
        };
        remove_quietly(&input).await;

        if let Err(error) = outcome {
            error!(%error, "Processing failed");
            self.api
                .send_message(chat_id, &format!("❌ Oops, something went wrong: {error}"))
                .await?;
        }
        Ok(())
    }

    async fn download(&self, document: &Document, dest: &Path) -> BotResult<PathBuf> {
        let file = self.api.get_file(&document.file_id).await?;
        let file_path = file
            .file_path
            .ok_or_else(|| BotError::Decode("getFile returned no file_path".to_string()))?;
        let path = self.api.download_file(&file_path, dest).await?;
        if !path.is_file() {
            return Err(BotError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} missing after download", path.display()),
            )));
        }
        Ok(path)
    }

    /// Runs the processor while relaying each stage to the chat.
    async fn run_pipeline(&self, chat_id: i64, input: PathBuf) -> BotResult<Processed> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Stage>();

        let relay = async {
            while let Some(stage) = rx.recv().await {
                info!(%stage, progress = stage.progress(), "Pipeline stage");
                if let Err(error) = self.api.send_message(chat_id, stage.message()).await {
                    warn!(%error, "Failed to send progress message");
                }
            }
        };

        let (result, ()) = tokio::join!(self.processor.process(input, tx), relay);
        result
    }

    async fn deliver(&self, message: &Message, processed: Processed) -> BotResult<()> {
        let chat_id = message.chat.id;
        let result = self.send_artifact(message, &processed).await;
        processed.cleanup();
        if result.is_ok() {
            info!(chat_id, "Sent and removed signed APK");
        }
        result
    }

    async fn send_artifact(&self, message: &Message, processed: &Processed) -> BotResult<()> {
        let chat_id = message.chat.id;

        if message.sender_id() != Some(self.owner_id) {
            warn!(user_id = ?message.sender_id(), "Unauthorized delivery attempt");
            self.api.send_message(chat_id, UNAUTHORIZED_TEXT).await?;
            return Ok(());
        }

        if !processed.signed_apk.is_file() {
            error!(file = %processed.signed_apk.display(), "Processed APK missing");
            self.api.send_message(chat_id, MISSING_OUTPUT_TEXT).await?;
            return Ok(());
        }

        if let Some(key_file) = &processed.key_file {
            info!(key_file = %key_file.display(), "Payload key kept on disk");
        }
        self.api
            .send_document(self.owner_id, &processed.signed_apk, DELIVERY_CAPTION)
            .await?;
        Ok(())
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn remove_quietly(path: &Path) {
    if tokio::fs::metadata(path).await.is_ok() {
        if let Err(error) = tokio::fs::remove_file(path).await {
            warn!(file = %path.display(), %error, "Failed to remove temporary file");
        }
    }
}
