//! Repackage an APK around an AES-256-GCM sealed copy of a payload and sign
//! the result, delegating decode/build to apktool and signing to jarsigner.

pub mod apk;
pub mod config;
pub mod crypto;
pub mod error;
pub mod pipeline;
pub mod repack;
pub mod sign;
pub mod toolchain;

pub use config::PipelineConfig;
pub use error::{PackError, Result};
pub use pipeline::{Artifact, Pipeline, Stage};
