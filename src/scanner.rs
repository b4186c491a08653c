//! Recursive discovery of video files under a dataset root

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{CatalogError, Result};
use crate::paths::DATA_DIR_NAME;

/// Extensions (lowercase, without the dot) that are cataloged
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "mkv", "flv", "webm"];

/// A subdirectory or entry the walk had to skip
#[derive(Debug, Clone, PartialEq)]
pub struct ScanWarning {
    pub path: Option<PathBuf>,
    pub message: String,
}

/// Result of a full scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Absolute paths of every video found, sorted
    pub videos: Vec<PathBuf>,
    pub warnings: Vec<ScanWarning>,
}

/// One step of the lazy walk
#[derive(Debug)]
pub enum ScanItem {
    Video(PathBuf),
    Skipped(ScanWarning),
}

/// Check if a path has one of the cataloged video extensions (case-insensitive)
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Lazily walk `root`, yielding videos and skipped entries.
///
/// Every call starts a fresh walk; nothing is cached between calls. Symlinks
/// are followed, and walkdir reports loops as errors, which become warnings
/// here. Our own `.data/` directory is never descended into.
pub fn videos(root: &Path) -> impl Iterator<Item = ScanItem> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != DATA_DIR_NAME)
        .filter_map(|entry| match entry {
            Ok(entry) => {
                let path = entry.path();
                if entry.file_type().is_file() && is_video(path) {
                    Some(ScanItem::Video(path.to_path_buf()))
                } else {
                    None
                }
            }
            Err(err) => Some(ScanItem::Skipped(ScanWarning {
                path: err.path().map(Path::to_path_buf),
                message: err.to_string(),
            })),
        })
}

/// Walk `root` to completion and collect the results.
///
/// Only an unreadable root is an error; problems in individual
/// subdirectories are recorded as warnings and the walk continues.
pub fn scan(root: &Path) -> Result<ScanReport> {
    fs::read_dir(root).map_err(|source| CatalogError::DatasetUnreadable {
        root: root.to_path_buf(),
        source: Arc::new(source),
    })?;

    let mut report = ScanReport::default();
    for item in videos(root) {
        match item {
            ScanItem::Video(path) => report.videos.push(path),
            ScanItem::Skipped(warning) => {
                warn!("⚠️  Skipped during scan: {}", warning.message);
                report.warnings.push(warning);
            }
        }
    }
    report.videos.sort();

    info!(
        "🔍 Found {} video(s) under {} ({} skipped)",
        report.videos.len(),
        root.display(),
        report.warnings.len()
    );
    Ok(report)
}
