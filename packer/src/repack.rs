//! Decode a base APK with apktool, drop the sealed payload under `res/raw`,
//! and build it back.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{PackError, Result};
use crate::toolchain::{run_tool, Toolchain};

pub struct Repackager<'a> {
    toolchain: &'a Toolchain,
    work_dir: PathBuf,
}

impl<'a> Repackager<'a> {
    pub fn new(toolchain: &'a Toolchain, work_dir: impl Into<PathBuf>) -> Self {
        Repackager {
            toolchain,
            work_dir: work_dir.into(),
        }
    }

    pub fn embed(&self, base_apk: &Path, payload: &Path, job_id: &str) -> Result<PathBuf> {
        for required in [base_apk, self.toolchain.apktool_jar.as_path(), payload] {
            if !required.is_file() {
                return Err(PackError::NotFound(required.to_path_buf()));
            }
        }

        let decoded = self.work_dir.join(format!("decoded_{job_id}"));
        let output = self.work_dir.join(format!("veil_{job_id}.apk"));
        let _guard = DirGuard(&decoded);

        info!(base = %base_apk.display(), "Decoding base APK with apktool");
        let mut decode = self.toolchain.apktool();
        decode
            .arg("d")
            .arg(base_apk)
            .arg("-o")
            .arg(&decoded)
            .arg("-f");
        run_tool("apktool", decode)?;

        let raw_dir = decoded.join("res").join("raw");
        fs::create_dir_all(&raw_dir).map_err(|e| PackError::io(&raw_dir, e))?;
        let resource = raw_dir.join(resource_name(payload));
        fs::copy(payload, &resource).map_err(|e| PackError::io(&resource, e))?;
        info!(resource = %resource.display(), "Placed payload resource");

        info!("Rebuilding decoded APK with apktool");
        let mut build = self.toolchain.apktool();
        build.arg("b").arg(&decoded).arg("-o").arg(&output);
        run_tool("apktool", build)?;

        if !output.is_file() {
            return Err(PackError::NotFound(output));
        }
        info!(output = %output.display(), "Built repackaged APK");
        Ok(output)
    }
}

struct DirGuard<'a>(&'a Path);

impl Drop for DirGuard<'_> {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(error) = fs::remove_dir_all(self.0) {
                warn!(dir = %self.0.display(), %error, "Failed to remove decoded directory");
            }
        }
    }
}

/// aapt only accepts `[a-z0-9_]` resource names, so the payload file name is
/// folded into that alphabet and its extensions are dropped.
pub fn resource_name(payload: &Path) -> String {
    let file_name = payload
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default();

    let mut name: String = stem
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() {
        name.push_str("payload");
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "p_");
    }
    name
}
