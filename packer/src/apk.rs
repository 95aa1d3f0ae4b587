use std::fs::File;
use std::path::Path;

use zip::ZipArchive;

use crate::error::{PackError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApkSummary {
    pub entries: usize,
    pub dex_files: usize,
    pub native_libs: usize,
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    if !path.is_file() {
        return Err(PackError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| PackError::io(path, e))?;
    ZipArchive::new(file).map_err(|e| PackError::InvalidApk {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Checks that `path` is a ZIP archive carrying an Android manifest.
pub fn validate_apk(path: &Path) -> Result<ApkSummary> {
    let zip = open_archive(path)?;

    let mut has_manifest = false;
    let mut summary = ApkSummary {
        entries: zip.len(),
        dex_files: 0,
        native_libs: 0,
    };

    for name in zip.file_names() {
        let is_dex = name.starts_with("classes") && name.ends_with(".dex");
        let is_lib = name.starts_with("lib/") && name.ends_with(".so");

        if name == "AndroidManifest.xml" {
            has_manifest = true;
        } else if is_dex {
            summary.dex_files += 1;
        } else if is_lib {
            summary.native_libs += 1;
        }
    }

    if !has_manifest {
        return Err(PackError::InvalidApk {
            path: path.to_path_buf(),
            reason: "no AndroidManifest.xml entry".to_string(),
        });
    }

    Ok(summary)
}

/// JAR signature block entries (`META-INF/*.SF`, `*.RSA`, `*.DSA`, `*.EC`).
pub fn signature_entries(path: &Path) -> Result<Vec<String>> {
    let zip = open_archive(path)?;

    let mut entries: Vec<String> = zip
        .file_names()
        .filter(|name| {
            name.strip_prefix("META-INF/").is_some_and(|rest| {
                !rest.contains('/')
                    && [".SF", ".RSA", ".DSA", ".EC"]
                        .iter()
                        .any(|ext| rest.to_ascii_uppercase().ends_with(ext))
            })
        })
        .map(str::to_string)
        .collect();
    entries.sort();
    Ok(entries)
}
