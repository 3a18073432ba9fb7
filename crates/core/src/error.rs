// crates/core/src/error.rs
//! Error types for the core library, one enum per concern.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the template store.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template store at {path} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("image template '{name}' has no image_path")]
    MissingImagePath { name: String },
}

/// Errors from recursive image discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("input directory not found: {path}")]
    InputDirNotFound { path: PathBuf },

    #[error("input path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("error walking {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Output format parse failure.
#[derive(Debug, Error)]
#[error("unknown output format '{0}' (expected KEEP, PNG, JPEG, WEBP, BMP or TIFF)")]
pub struct FormatError(pub String);

/// Per-item watermark application failure.
///
/// These never abort a batch; the job runner records them in the error
/// counters and moves on.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("watermark image not found: {path}")]
    WatermarkImageMissing { path: PathBuf },

    #[error("no usable font found; set font_path on the template")]
    FontUnavailable,

    #[error("invalid font file: {path}")]
    FontInvalid { path: PathBuf },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
