//! Per-run payload keys and AES-256-GCM sealing.
//!
//! Sealed blobs are laid out as `[nonce (12)] [ciphertext + tag]` so a blob
//! carries everything except the key needed to open it.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::Rng;
use tracing::{debug, info};

use crate::error::{CryptoError, PackError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Clone, PartialEq, Eq)]
pub struct PayloadKey([u8; KEY_LEN]);

impl PayloadKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill(&mut bytes);
        PayloadKey(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> std::result::Result<Self, CryptoError> {
        let raw = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", raw.len()))
        })?;
        Ok(PayloadKey(bytes))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PackError::io(path, e))?;
        Ok(Self::from_hex(&text)?)
    }
}

impl fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadKey(<redacted>)")
    }
}

/// Directory holding one key file per pipeline run.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        KeyStore { dir: dir.into() }
    }

    pub fn persist(&self, key: &PayloadKey) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| PackError::io(&self.dir, e))?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let short_id = uuid::Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!("veil_{stamp}_{}.key", &short_id[..8]));

        fs::write(&path, format!("{}\n", key.to_hex())).map_err(|e| PackError::io(&path, e))?;
        restrict_permissions(&path)?;

        info!(key_file = %path.display(), "Generated encryption key");
        Ok(path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| PackError::io(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

pub fn encrypt_payload(key: &PayloadKey, data: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(&key.0.into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| CryptoError::Encrypt(format!("{:?}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

pub fn decrypt_payload(key: &PayloadKey, sealed: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Truncated(sealed.len()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(&key.0.into());
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}

/// Encrypts `path` into a sibling `<path>.encrypted` file.
pub fn encrypt_file(key: &PayloadKey, path: &Path) -> Result<PathBuf> {
    encrypt_file_into(key, path, path.parent().unwrap_or_else(|| Path::new(".")))
}

/// Encrypts `path` into `<dir>/<file name>.encrypted`.
pub fn encrypt_file_into(key: &PayloadKey, path: &Path, dir: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(PackError::NotFound(path.to_path_buf()));
    }

    let data = fs::read(path).map_err(|e| PackError::io(path, e))?;
    let sealed = encrypt_payload(key, &data)?;

    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "payload".into());
    name.push(".encrypted");
    let out = dir.join(name);

    fs::write(&out, &sealed).map_err(|e| PackError::io(&out, e))?;
    debug!(plain = data.len(), sealed = sealed.len(), "Sealed payload");
    info!(output = %out.display(), "Encrypted payload");
    Ok(out)
}
