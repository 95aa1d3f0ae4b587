use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::SigningConfig;
use crate::error::{PackError, Result};
use crate::toolchain::{run_tool, Toolchain};

const STOREPASS_ENV: &str = "VEIL_STOREPASS";
const KEYPASS_ENV: &str = "VEIL_KEYPASS";

pub struct Signer<'a> {
    toolchain: &'a Toolchain,
    config: SigningConfig,
}

impl<'a> Signer<'a> {
    pub fn new(toolchain: &'a Toolchain, config: SigningConfig) -> Self {
        Signer { toolchain, config }
    }

    pub fn signed_path(apk: &Path) -> PathBuf {
        let name = apk
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output.apk".to_string());
        apk.with_file_name(format!("signed_{name}"))
    }

    /// Signs `apk` into `signed_<name>` beside it. Passwords reach jarsigner
    /// through its `:env` option forms, never through argv.
    pub fn sign(&self, apk: &Path) -> Result<PathBuf> {
        for required in [apk, self.config.keystore.as_path()] {
            if !required.is_file() {
                return Err(PackError::NotFound(required.to_path_buf()));
            }
        }

        let signed = Self::signed_path(apk);

        let mut cmd = self.toolchain.jarsigner();
        cmd.arg("-verbose")
            .arg("-keystore")
            .arg(&self.config.keystore)
            .arg("-signedjar")
            .arg(&signed)
            .arg(apk)
            .arg(&self.config.alias)
            .arg("-storepass:env")
            .arg(STOREPASS_ENV)
            .env(STOREPASS_ENV, &self.config.store_password);

        if let Some(key_password) = &self.config.key_password {
            cmd.arg("-keypass:env")
                .arg(KEYPASS_ENV)
                .env(KEYPASS_ENV, key_password);
        }

        run_tool("jarsigner", cmd)?;

        if !signed.is_file() {
            return Err(PackError::NotFound(signed));
        }
        info!(signed = %signed.display(), "Signed APK");
        Ok(signed)
    }
}
