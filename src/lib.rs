//! Cataloging for folders of training videos
//!
//! Scans a dataset directory for videos, keeps user tags and notes for each
//! one in `.data/video_metadata.json` (keyed by path relative to the dataset
//! root), archives every save under `.data/history/`, and generates preview
//! thumbnails in the background.

pub mod desktop;
pub mod error;
pub mod logging;
pub mod paths;
pub mod preview;
pub mod scanner;
pub mod session;
pub mod settings;
pub mod state;

pub use error::{CatalogError, Result};
pub use paths::{to_absolute, to_key, DatasetLayout, RelKey};
pub use session::{OpenSummary, Row, SaveReport, ScannedDataset, Session};
pub use settings::{PreviewSettings, Settings};
pub use state::{normalize, MetadataEntry, MetadataStore, Tags};
