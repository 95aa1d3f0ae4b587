use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use veil_packer::crypto::{self, KeyStore, PayloadKey};
use veil_packer::repack::Repackager;
use veil_packer::sign::Signer;
use veil_packer::toolchain::Toolchain;
use veil_packer::{Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML settings file
    #[arg(short, long, default_value = "veil.toml")]
    config: PathBuf,

    /// Log external tool output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate and store a fresh payload key
    Keygen,

    /// Seal a file into <file>.encrypted with a fresh key
    Encrypt { file: PathBuf },

    /// Open a sealed file
    Decrypt {
        file: PathBuf,

        #[arg(short, long)]
        key: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Embed an already sealed payload into an APK with apktool
    Repack { apk: PathBuf, payload: PathBuf },

    /// Sign an APK with the configured keystore
    Sign { apk: PathBuf },

    /// Encrypt, embed and sign in one go
    Run {
        apk: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    match args.command {
        Cmd::Keygen => {
            let path = KeyStore::new(&config.paths.keys_dir).persist(&PayloadKey::generate())?;
            println!("{}", path.display());
        }
        Cmd::Encrypt { file } => {
            let key = PayloadKey::generate();
            let key_file = KeyStore::new(&config.paths.keys_dir).persist(&key)?;
            let sealed = crypto::encrypt_file(&key, &file)?;
            println!("Encrypted {} -> {}", file.display(), sealed.display());
            println!("Key: {}", key_file.display());
        }
        Cmd::Decrypt { file, key, output } => {
            let key = PayloadKey::load(&key)?;
            let sealed = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let plain = crypto::decrypt_payload(&key, &sealed)?;
            let output = output.unwrap_or_else(|| {
                let stem = file.to_string_lossy();
                PathBuf::from(stem.strip_suffix(".encrypted").unwrap_or(&format!("{stem}.decrypted")))
            });
            fs::write(&output, plain).with_context(|| format!("writing {}", output.display()))?;
            println!("Decrypted {} -> {}", file.display(), output.display());
        }
        Cmd::Repack { apk, payload } => {
            let toolchain = Toolchain::resolve(&config.toolchain)?;
            let job_id = Uuid::new_v4().to_string();
            let built = Repackager::new(&toolchain, &config.paths.work_dir).embed(&apk, &payload, &job_id)?;
            println!("Success! Output written to {}", built.display());
        }
        Cmd::Sign { apk } => {
            config.validate()?;
            let toolchain = Toolchain::resolve(&config.toolchain)?;
            let signed = Signer::new(&toolchain, config.signing.clone()).sign(&apk)?;
            println!("Success! Output written to {}", signed.display());
        }
        Cmd::Run { apk, output } => {
            let pipeline = Pipeline::new(config)?;
            let artifact = pipeline.run(&apk, |stage| {
                println!("[{:>3}%] {}", stage.progress(), stage.message());
            })?;

            let dest = output.unwrap_or_else(|| {
                PathBuf::from(
                    artifact
                        .signed_apk
                        .file_name()
                        .map(|n| n.to_os_string())
                        .unwrap_or_else(|| "signed_output.apk".into()),
                )
            });
            let key_file = artifact.key_file.clone();
            let written = artifact.persist_to(&dest)?;
            println!("Success! Output written to {}", written.display());
            println!("Key: {}", key_file.display());
        }
    }

    Ok(())
}
