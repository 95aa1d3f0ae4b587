//! The encrypt -> embed -> sign run over one uploaded APK.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::apk;
use crate::config::PipelineConfig;
use crate::crypto::{self, KeyStore, PayloadKey};
use crate::error::{PackError, Result};
use crate::repack::Repackager;
use crate::sign::Signer;
use crate::toolchain::Toolchain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Encrypting,
    Embedding,
    Signing,
    Done,
}

impl Stage {
    pub fn message(self) -> &'static str {
        match self {
            Stage::Encrypting => "🔐 Encrypting the APK...",
            Stage::Embedding => "📦 Embedding into a new APK...",
            Stage::Signing => "🔏 Signing the APK...",
            Stage::Done => "✅ All done! Sending you the protected APK...",
        }
    }

    pub fn progress(self) -> u8 {
        match self {
            Stage::Encrypting => 10,
            Stage::Embedding => 40,
            Stage::Signing => 90,
            Stage::Done => 100,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Encrypting => "encrypting",
            Stage::Embedding => "embedding",
            Stage::Signing => "signing",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-job scratch directory, removed when dropped.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: PathBuf,
}

impl JobWorkspace {
    fn create(work_dir: &Path, job_id: &str) -> Result<Self> {
        let dir = work_dir.join(format!("job_{job_id}"));
        fs::create_dir_all(&dir).map_err(|e| PackError::io(&dir, e))?;
        Ok(JobWorkspace { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if !self.dir.exists() {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => info!(dir = %self.dir.display(), "Removed job workspace"),
            Err(error) => warn!(dir = %self.dir.display(), %error, "Failed to remove job workspace"),
        }
    }
}

/// A signed APK plus the key that opens its payload. Dropping it (or calling
/// [`Artifact::cleanup`]) deletes the job workspace, signed APK included.
#[derive(Debug)]
pub struct Artifact {
    pub job_id: String,
    pub signed_apk: PathBuf,
    pub key_file: PathBuf,
    workspace: JobWorkspace,
}

impl Artifact {
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Copies the signed APK out of the workspace before it is removed.
    pub fn persist_to(self, dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PackError::io(parent, e))?;
        }
        fs::copy(&self.signed_apk, dest).map_err(|e| PackError::io(dest, e))?;
        Ok(dest.to_path_buf())
    }

    pub fn cleanup(self) {
        drop(self);
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    toolchain: Toolchain,
    keys: KeyStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let toolchain = Toolchain::resolve(&config.toolchain)?;
        Ok(Self::with_toolchain(config, toolchain))
    }

    pub fn with_toolchain(config: PipelineConfig, toolchain: Toolchain) -> Self {
        let keys = KeyStore::new(config.paths.keys_dir.clone());
        Pipeline {
            config,
            toolchain,
            keys,
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn run(&self, input_apk: &Path, mut on_stage: impl FnMut(Stage)) -> Result<Artifact> {
        let job_id = Uuid::new_v4().to_string();
        let span = info_span!("job", job_id = %job_id);
        let _entered = span.enter();

        let summary = apk::validate_apk(input_apk)?;
        info!(
            input = %input_apk.display(),
            entries = summary.entries,
            dex = summary.dex_files,
            native_libs = summary.native_libs,
            "Received APK"
        );

        let workspace = JobWorkspace::create(&self.config.paths.work_dir, &job_id)?;

        on_stage(Stage::Encrypting);
        let key = PayloadKey::generate();
        let payload = crypto::encrypt_file_into(&key, input_apk, workspace.path())?;

        on_stage(Stage::Embedding);
        let base_apk = self.config.paths.base_apk.as_deref().unwrap_or(input_apk);
        let built = Repackager::new(&self.toolchain, workspace.path()).embed(base_apk, &payload, &job_id)?;

        on_stage(Stage::Signing);
        let signed_apk = Signer::new(&self.toolchain, self.config.signing.clone()).sign(&built)?;
        match apk::signature_entries(&signed_apk) {
            Ok(entries) if entries.is_empty() => {
                warn!(signed = %signed_apk.display(), "Signed APK carries no signature block")
            }
            Ok(entries) => info!(?entries, "Signature blocks present"),
            Err(error) => warn!(%error, "Could not inspect signed APK"),
        }

        // Only a delivered payload needs its key on disk.
        let key_file = self.keys.persist(&key)?;

        on_stage(Stage::Done);
        Ok(Artifact {
            job_id,
            signed_apk,
            key_file,
            workspace,
        })
    }
}
