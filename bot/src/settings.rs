use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use veil_packer::config::{env_value, read_toml, PipelineConfig};
use veil_packer::error::ConfigError;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub token: String,
    pub authorized_user_id: Option<i64>,
    pub api_base: String,
    pub poll_timeout_secs: u64,
    pub log_file: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            token: String::new(),
            authorized_user_id: None,
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 30,
            log_file: PathBuf::from("veil_bot.log"),
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"<redacted>")
            .field("authorized_user_id", &self.authorized_user_id)
            .field("api_base", &self.api_base)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl BotConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bot: BotConfig,
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

impl Settings {
    /// File first (if present), then `VEIL_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut settings: Settings = if path.exists() {
            read_toml(path)?
        } else {
            Settings::default()
        };
        settings.apply_env()?;
        settings.pipeline.expand_paths();
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(token) = env_value("VEIL_BOT_TOKEN") {
            self.bot.token = token;
        }
        if let Some(user) = env_value("VEIL_AUTHORIZED_USER") {
            let id = user.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: "VEIL_AUTHORIZED_USER",
                reason: e.to_string(),
            })?;
            self.bot.authorized_user_id = Some(id);
        }
        self.pipeline.apply_env();
        Ok(())
    }

    pub fn validate(&self) -> Result<i64, ConfigError> {
        if self.bot.token.trim().is_empty() {
            return Err(ConfigError::Missing("bot.token"));
        }
        let owner = self
            .bot
            .authorized_user_id
            .ok_or(ConfigError::Missing("bot.authorized_user_id"))?;
        if self.bot.poll_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "bot.poll_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        self.pipeline.validate()?;
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
        [bot]
        token = "123:ABC"
        authorized_user_id = 42

        [toolchain]
        apktool_jar = "/opt/apktool/apktool_2.7.0.jar"

        [signing]
        keystore = "/etc/veil/release.jks"
        alias = "release"
        store_password = "hunter2"
    "#;

    #[test]
    #[serial]
    fn reads_bot_and_pipeline_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veil.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.bot.token, "123:ABC");
        assert_eq!(settings.bot.api_base, DEFAULT_API_BASE);
        assert_eq!(settings.bot.poll_timeout(), Duration::from_secs(30));
        assert_eq!(
            settings.pipeline.toolchain.apktool_jar,
            PathBuf::from("/opt/apktool/apktool_2.7.0.jar")
        );
        assert_eq!(settings.validate().unwrap(), 42);
    }

    #[test]
    #[serial]
    fn environment_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veil.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        std::env::set_var("VEIL_BOT_TOKEN", "999:ENV");
        std::env::set_var("VEIL_AUTHORIZED_USER", " 7 ");
        let settings = Settings::load(&path);
        std::env::remove_var("VEIL_BOT_TOKEN");
        std::env::remove_var("VEIL_AUTHORIZED_USER");

        let settings = settings.unwrap();
        assert_eq!(settings.bot.token, "999:ENV");
        assert_eq!(settings.bot.authorized_user_id, Some(7));
    }

    #[test]
    #[serial]
    fn bad_user_id_in_environment() {
        std::env::set_var("VEIL_AUTHORIZED_USER", "admin");
        let result = Settings::load(Path::new("/nonexistent/veil.toml"));
        std::env::remove_var("VEIL_AUTHORIZED_USER");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    #[serial]
    fn token_and_owner_are_required() {
        let mut settings = Settings::default();
        assert!(matches!(settings.validate(), Err(ConfigError::Missing("bot.token"))));

        settings.bot.token = "1:x".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Missing("bot.authorized_user_id"))
        ));
    }

    #[test]
    fn debug_hides_token() {
        let mut settings = Settings::default();
        settings.bot.token = "123:SECRET".to_string();
        assert!(!format!("{:?}", settings).contains("SECRET"));
    }
}
