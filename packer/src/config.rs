//! Toolchain, signing and path settings shared by the CLI and the bot.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_APKTOOL_JAR: &str = "apktool_2.7.0.jar";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub java: PathBuf,
    pub apktool_jar: PathBuf,
    pub jarsigner: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            java: PathBuf::from("java"),
            apktool_jar: PathBuf::from(DEFAULT_APKTOOL_JAR),
            jarsigner: PathBuf::from("jarsigner"),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub keystore: PathBuf,
    pub alias: String,
    pub store_password: String,
    pub key_password: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        SigningConfig {
            keystore: expand_home(Path::new("~/my_keystore.jks")),
            alias: "my_key_alias".to_string(),
            store_password: String::new(),
            key_password: None,
        }
    }
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("keystore", &self.keystore)
            .field("alias", &self.alias)
            .field("store_password", &"<redacted>")
            .field("key_password", &self.key_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub work_dir: PathBuf,
    pub keys_dir: PathBuf,
    /// Package that receives the payload. Unset means the uploaded APK is
    /// repacked around itself.
    pub base_apk: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            work_dir: PathBuf::from("."),
            keys_dir: PathBuf::from("keys"),
            base_apk: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub toolchain: ToolchainConfig,
    pub signing: SigningConfig,
    pub paths: PathsConfig,
}

impl PipelineConfig {
    /// Reads a TOML file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: PipelineConfig = read_toml(path)?;
        config.apply_env();
        config.expand_paths();
        Ok(config)
    }

    /// Like [`PipelineConfig::load`], but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        let mut config = PipelineConfig::default();
        config.apply_env();
        config.expand_paths();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Some(value) = env_value("VEIL_KEYSTORE") {
            self.signing.keystore = PathBuf::from(value);
        }
        if let Some(value) = env_value("VEIL_KEY_ALIAS") {
            self.signing.alias = value;
        }
        if let Some(value) = env_value("VEIL_STORE_PASSWORD") {
            self.signing.store_password = value;
        }
        if let Some(value) = env_value("VEIL_KEY_PASSWORD") {
            self.signing.key_password = Some(value);
        }
    }

    pub fn expand_paths(&mut self) {
        self.signing.keystore = expand_home(&self.signing.keystore);
        self.toolchain.apktool_jar = expand_home(&self.toolchain.apktool_jar);
        if let Some(base) = self.paths.base_apk.take() {
            self.paths.base_apk = Some(expand_home(&base));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing.alias.trim().is_empty() {
            return Err(ConfigError::Missing("signing.alias"));
        }
        if self.signing.store_password.is_empty() {
            return Err(ConfigError::Missing("signing.store_password"));
        }
        Ok(())
    }
}

pub fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
