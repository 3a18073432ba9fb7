// crates/core/src/discovery.rs
//! Recursive image discovery.
//!
//! Walks an input directory once and produces the stable, sorted list of
//! work items a job operates on. Files appearing after the walk are not
//! picked up — the snapshot is taken exactly once per job.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::DiscoveryError;

/// Extensions considered images, lowercase.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "bmp", "tiff"];

/// One input file paired with its path relative to the input root.
///
/// The relative path is preserved in the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub src: PathBuf,
    pub rel: PathBuf,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Enumerate all images under `input_root`, sorted by path.
pub fn enumerate_images(input_root: &Path) -> Result<Vec<WorkItem>, DiscoveryError> {
    if !input_root.exists() {
        return Err(DiscoveryError::InputDirNotFound {
            path: input_root.to_path_buf(),
        });
    }
    if !input_root.is_dir() {
        return Err(DiscoveryError::NotADirectory {
            path: input_root.to_path_buf(),
        });
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(input_root).sort_by_file_name() {
        let entry = entry.map_err(|source| DiscoveryError::Walk {
            path: input_root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() || !is_image(entry.path()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(input_root)
            .expect("walked path is under its root")
            .to_path_buf();
        items.push(WorkItem {
            src: entry.path().to_path_buf(),
            rel,
        });
    }
    Ok(items)
}
