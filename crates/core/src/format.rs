// crates/core/src/format.rs
//! Output format selection and output-path mapping.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::ImageFormat;

use crate::error::FormatError;

/// Requested encoding for job outputs.
///
/// `Keep` re-encodes each file in the format implied by its own extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Keep,
    Png,
    Jpeg,
    Webp,
    Bmp,
    Tiff,
}

impl FromStr for OutputFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "KEEP" => Ok(Self::Keep),
            "PNG" => Ok(Self::Png),
            "JPEG" | "JPG" => Ok(Self::Jpeg),
            "WEBP" => Ok(Self::Webp),
            "BMP" => Ok(Self::Bmp),
            "TIFF" => Ok(Self::Tiff),
            other => Err(FormatError(other.to_string())),
        }
    }
}

impl OutputFormat {
    /// File extension written for forced formats; `None` for `Keep`.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Keep => None,
            Self::Png => Some("png"),
            Self::Jpeg => Some("jpg"),
            Self::Webp => Some("webp"),
            Self::Bmp => Some("bmp"),
            Self::Tiff => Some("tiff"),
        }
    }

    /// Concrete encoder for a file, resolving `Keep` from the source
    /// extension (discovery only yields known extensions; PNG is the
    /// conservative fallback).
    pub fn resolve(&self, src: &Path) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Webp => ImageFormat::WebP,
            Self::Bmp => ImageFormat::Bmp,
            Self::Tiff => ImageFormat::Tiff,
            Self::Keep => {
                let ext = src
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
                    .unwrap_or_default();
                match ext.as_str() {
                    "jpg" | "jpeg" => ImageFormat::Jpeg,
                    "webp" => ImageFormat::WebP,
                    "bmp" => ImageFormat::Bmp,
                    "tiff" => ImageFormat::Tiff,
                    _ => ImageFormat::Png,
                }
            }
        }
    }
}

/// Maps each work item's relative path into the output tree.
#[derive(Debug, Clone)]
pub struct OutputMap {
    pub root: PathBuf,
    format: OutputFormat,
}

impl OutputMap {
    pub fn new(root: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Destination for one item: output root + relative path, with the
    /// extension swapped when a concrete format is forced.
    pub fn path_for(&self, rel: &Path) -> PathBuf {
        let mut dst = self.root.join(rel);
        if let Some(ext) = self.format.extension() {
            dst.set_extension(ext);
        }
        dst
    }
}
