use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use veil_bot::telegram::{BotApi, TelegramClient};
use veil_bot::{logging, Dispatcher, Handler, PipelineProcessor, Settings};
use veil_packer::Pipeline;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML settings file; `VEIL_*` environment variables override it
    #[arg(short, long, default_value = "veil.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let dotenv = dotenvy::dotenv();

    let settings = Settings::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let _log_guard = logging::init(&settings.bot.log_file)?;
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let owner_id = settings.validate().context("invalid settings")?;
    info!(owner_id, config = ?settings.pipeline, "Starting");

    let incoming_dir = settings.pipeline.paths.work_dir.join("incoming");
    let pipeline = Pipeline::new(settings.pipeline.clone()).context("preparing toolchain")?;
    info!(apktool = %pipeline.toolchain().apktool_jar.display(), "Toolchain ready");

    let api: Arc<dyn BotApi> = Arc::new(TelegramClient::new(&settings.bot.api_base, &settings.bot.token)?);
    let handler = Handler::new(
        Arc::clone(&api),
        Arc::new(PipelineProcessor::new(pipeline)),
        owner_id,
        incoming_dir,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(error) => {
                // Dropping the sender would read as a shutdown request.
                warn!(%error, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    Dispatcher::new(api, handler, settings.bot.poll_timeout())
        .run(shutdown_rx)
        .await;
    Ok(())
}
