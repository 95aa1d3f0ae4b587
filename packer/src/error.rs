use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encrypted payload is truncated ({0} bytes, need at least a 12 byte nonce)")]
    Truncated(usize),

    #[error("encryption failure: {0}")]
    Encrypt(String),

    #[error("decryption failure: wrong key or corrupted payload")]
    Decrypt,

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum PackError {
    #[error("required file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot locate {0}; set toolchain.apktool_jar or VEIL_TOOLCHAIN_DIR")]
    ToolNotFound(String),

    #[error("not a valid APK {}: {reason}", .path.display())]
    InvalidApk { path: PathBuf, reason: String },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code:?}. {}", last_line(.stderr_tail))]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr_tail: Vec<String>,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PackError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PackError::Io {
            path: path.into(),
            source,
        }
    }
}

fn last_line(lines: &[String]) -> &str {
    lines
        .last()
        .map(String::as_str)
        .unwrap_or("No stderr output captured")
}
