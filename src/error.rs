//! Error types for the video catalog
//!
//! Per-file problems (a key outside the dataset root, a bad entry in the
//! metadata file, a video that cannot be previewed) are reported and skipped.
//! Only whole-operation failures (the metadata file cannot be written, the
//! dataset root cannot be read) are surfaced to the user as blocking errors.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Everything that can go wrong while cataloging a dataset.
///
/// I/O sources are kept behind an `Arc` so errors can be cloned into UI
/// messages without losing the original cause.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// A scanned path does not live under the dataset root
    #[error("{} is not inside dataset root {}", path.display(), root.display())]
    InvalidPath { path: PathBuf, root: PathBuf },

    /// A stored key is absolute, escapes the root, or is otherwise unusable
    #[error("invalid relative key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// The metadata file exists but does not hold the expected JSON object
    #[error("metadata file {} is malformed: {reason}", path.display())]
    MalformedMetadata { path: PathBuf, reason: String },

    /// Reading or writing a catalog file failed
    #[error("cannot access {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The dataset root itself cannot be listed
    #[error("cannot read dataset directory {}: {source}", root.display())]
    DatasetUnreadable {
        root: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// No preview could be produced for one video
    #[error("no preview for {key}: {reason}")]
    PreviewUnavailable { key: String, reason: String },

    /// An operation needs an open dataset and none is selected
    #[error("no dataset directory selected")]
    NoDataset,

    /// The default player could not be launched
    #[error("failed to open {}: {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl CatalogError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CatalogError::Persistence {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// True for errors that stop the whole operation rather than one file
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            CatalogError::Persistence { .. } | CatalogError::DatasetUnreadable { .. }
        )
    }
}
