//! The open dataset and everything attached to it
//!
//! A `Session` owns the metadata store, the export selection and the preview
//! worker. It lives on the interactive thread; the only thing that crosses
//! threads is the preview event channel inside [`PreviewBridge`].

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::desktop::MediaLauncher;
use crate::error::{CatalogError, Result};
use crate::paths::{DatasetLayout, RelKey};
use crate::preview::{
    PreviewBridge, PreviewItem, PreviewPipeline, PreviewReady, PreviewState, ThumbnailExtractor,
};
use crate::scanner::{self, ScanReport};
use crate::state::history;
use crate::state::library::atomic_write;
use crate::state::{LoadReport, MetadataEntry, MetadataStore};

/// Result of the blocking part of opening or refreshing a dataset.
///
/// Produced off the interactive thread, then handed to [`Session::install`].
#[derive(Debug, Clone)]
pub struct ScannedDataset {
    pub layout: DatasetLayout,
    pub scan: ScanReport,
    /// Freshly loaded metadata; `None` for a refresh of the open dataset
    pub loaded: Option<(MetadataStore, LoadReport)>,
}

impl ScannedDataset {
    /// Scan `root` and, if `reload`, read its metadata file too
    pub fn scan(root: impl Into<PathBuf>, reload: bool) -> Result<Self> {
        let layout = DatasetLayout::new(root);
        let scan = scanner::scan(layout.root())?;
        let loaded = if reload {
            Some(MetadataStore::load(layout.clone())?)
        } else {
            None
        };
        Ok(ScannedDataset { layout, scan, loaded })
    }
}

/// What opening or refreshing found, for the status line
#[derive(Debug, Clone, Default)]
pub struct OpenSummary {
    pub videos: usize,
    pub added: usize,
    pub retained_missing: usize,
    /// Files or stored entries skipped along the way
    pub skipped: usize,
    /// Set when the metadata file had to be ignored
    pub malformed: Option<CatalogError>,
}

/// Outcome of [`Session::save`].
///
/// The metadata file is written first; the history copy can fail on its own
/// without undoing that.
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub metadata_path: PathBuf,
    pub history: Result<PathBuf>,
}

/// One line of the catalog table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: RelKey,
    pub file_name: String,
    pub tags: String,
    pub notes: String,
    /// Found by the last scan
    pub present: bool,
    pub selected: bool,
    pub preview: PreviewState,
}

#[derive(Debug)]
struct Dataset {
    store: MetadataStore,
    selection: BTreeSet<RelKey>,
}

pub struct Session {
    dataset: Option<Dataset>,
    pipeline: PreviewPipeline,
    bridge: PreviewBridge,
}

impl Session {
    /// Start the preview worker. No dataset is open yet.
    pub fn new(extractor: Arc<dyn ThumbnailExtractor>) -> io::Result<Self> {
        let (events, bridge) = PreviewBridge::channel();
        let pipeline = PreviewPipeline::spawn(extractor, events)?;
        Ok(Session {
            dataset: None,
            pipeline,
            bridge,
        })
    }

    /// Scan and load `root` in one go, replacing the open dataset
    pub fn open(&mut self, root: impl Into<PathBuf>) -> Result<OpenSummary> {
        self.cancel_previews();
        let scanned = ScannedDataset::scan(root, true)?;
        self.install(scanned)
    }

    /// Rescan the open dataset, keeping unsaved edits
    pub fn refresh(&mut self) -> Result<OpenSummary> {
        let root = self.root().ok_or(CatalogError::NoDataset)?.to_path_buf();
        self.cancel_previews();
        let scanned = ScannedDataset::scan(root, false)?;
        self.install(scanned)
    }

    /// Merge a finished scan into the session and restart previews.
    ///
    /// With freshly loaded metadata the open dataset is replaced. Without,
    /// the scan is merged into the live store, which must belong to the same
    /// root.
    pub fn install(&mut self, scanned: ScannedDataset) -> Result<OpenSummary> {
        let ScannedDataset { layout, scan, loaded } = scanned;
        let mut summary = OpenSummary {
            videos: scan.videos.len(),
            skipped: scan.warnings.len(),
            ..OpenSummary::default()
        };

        match loaded {
            Some((store, report)) => {
                summary.skipped += report.rejected.len();
                summary.malformed = report.malformed;
                self.dataset = Some(Dataset {
                    store,
                    selection: BTreeSet::new(),
                });
            }
            None => {
                let same_root = self
                    .dataset
                    .as_ref()
                    .is_some_and(|d| d.store.layout() == &layout);
                if !same_root {
                    return Err(CatalogError::NoDataset);
                }
            }
        }

        let dataset = self.dataset.as_mut().ok_or(CatalogError::NoDataset)?;
        let merged = dataset.store.merge(&scan.videos);
        summary.added = merged.added;
        summary.retained_missing = merged.retained_missing;
        summary.skipped += merged.rejected.len();

        let store = &dataset.store;
        dataset.selection.retain(|key| store.get(key).is_some());

        info!(
            "📂 {}: {} videos, {} new, {} skipped",
            layout.root().display(),
            summary.videos,
            summary.added,
            summary.skipped
        );
        self.restart_previews();
        Ok(summary)
    }

    /// Stop the running preview pass, e.g. because a new scan is starting.
    ///
    /// Results still in flight are discarded.
    pub fn cancel_previews(&mut self) {
        self.pipeline.cancel();
        self.bridge.clear();
    }

    fn restart_previews(&mut self) {
        let Some(dataset) = &self.dataset else {
            self.cancel_previews();
            return;
        };
        let items: Vec<PreviewItem> = dataset
            .store
            .present_videos()
            .into_iter()
            .map(|(key, source)| PreviewItem { key, source })
            .collect();
        let keys: Vec<RelKey> = items.iter().map(|item| item.key.clone()).collect();

        let generation = self
            .pipeline
            .start_pass(items, dataset.store.layout().previews_dir());
        self.bridge.begin_pass(generation, keys);
    }

    /// Forget the open dataset without saving
    pub fn close(&mut self) {
        self.dataset = None;
        self.restart_previews();
    }

    pub fn root(&self) -> Option<&Path> {
        self.dataset.as_ref().map(|d| d.store.layout().root())
    }

    pub fn store(&self) -> Option<&MetadataStore> {
        self.dataset.as_ref().map(|d| &d.store)
    }

    fn store_mut(&mut self) -> Result<&mut MetadataStore> {
        self.dataset
            .as_mut()
            .map(|d| &mut d.store)
            .ok_or(CatalogError::NoDataset)
    }

    pub fn update_entry(&mut self, key: &RelKey, raw_tags: &str, notes: &str) -> Result<MetadataEntry> {
        Ok(self.store_mut()?.update_entry(key, raw_tags, notes).clone())
    }

    pub fn set_tags(&mut self, key: &RelKey, raw_tags: &str) -> Result<MetadataEntry> {
        Ok(self.store_mut()?.set_tags(key, raw_tags).clone())
    }

    pub fn set_notes(&mut self, key: &RelKey, notes: &str) -> Result<MetadataEntry> {
        Ok(self.store_mut()?.set_notes(key, notes).clone())
    }

    /// Save the metadata file, then archive a copy of it
    pub fn save(&mut self) -> Result<SaveReport> {
        let store = self.store_mut()?;
        let metadata_path = store.save()?;
        let history = history::snapshot(&metadata_path, &store.layout().history_dir());
        if let Err(e) = &history {
            warn!("⚠️  Saved, but history snapshot failed: {}", e);
        }
        Ok(SaveReport { metadata_path, history })
    }

    /// History records of the open dataset, newest first
    pub fn history(&self) -> Result<Vec<PathBuf>> {
        match self.store() {
            Some(store) => history::list_history(&store.layout().history_dir()),
            None => Ok(Vec::new()),
        }
    }

    /// Drop entries for videos the last scan did not find
    pub fn prune_missing(&mut self) -> Result<usize> {
        let dataset = self.dataset.as_mut().ok_or(CatalogError::NoDataset)?;
        let removed = dataset.store.prune_missing();
        let store = &dataset.store;
        dataset.selection.retain(|key| store.get(key).is_some());
        Ok(removed)
    }

    pub fn tag_counts_ranked(&self) -> Vec<(String, usize)> {
        self.store().map(MetadataStore::tag_counts_ranked).unwrap_or_default()
    }

    pub fn untagged_count(&self) -> usize {
        self.store().map_or(0, MetadataStore::untagged_count)
    }

    /// Table rows in key order
    pub fn rows(&self) -> Vec<Row> {
        let Some(dataset) = &self.dataset else {
            return Vec::new();
        };
        dataset
            .store
            .entries()
            .map(|(key, entry)| Row {
                key: key.clone(),
                file_name: key.file_name().to_string(),
                tags: entry.tags.to_string(),
                notes: entry.notes.clone(),
                present: dataset.store.is_present(key),
                selected: dataset.selection.contains(key),
                preview: self.bridge.state(key),
            })
            .collect()
    }

    /// Apply preview results that arrived since the last call
    pub fn poll_previews(&mut self) -> Vec<PreviewReady> {
        self.bridge.drain()
    }

    /// Be told about every preview that becomes ready (called from `poll_previews`)
    pub fn subscribe_previews(&mut self, callback: impl FnMut(&PreviewReady) + 'static) {
        self.bridge.subscribe(callback);
    }

    pub fn preview_state(&self, key: &RelKey) -> PreviewState {
        self.bridge.state(key)
    }

    pub fn previews_running(&self) -> bool {
        self.bridge.is_running()
    }

    /// Videos whose preview could not be produced in the current pass
    pub fn preview_failures(&self) -> Vec<CatalogError> {
        self.bridge
            .failures()
            .into_iter()
            .map(|(key, reason)| CatalogError::PreviewUnavailable {
                key: key.to_string(),
                reason,
            })
            .collect()
    }

    /// Flip export selection for `key`; returns whether it is now selected
    pub fn toggle_selected(&mut self, key: &RelKey) -> bool {
        let Some(dataset) = self.dataset.as_mut() else {
            return false;
        };
        if dataset.selection.remove(key) {
            false
        } else if dataset.store.get(key).is_some() {
            dataset.selection.insert(key.clone())
        } else {
            false
        }
    }

    pub fn is_selected(&self, key: &RelKey) -> bool {
        self.dataset.as_ref().is_some_and(|d| d.selection.contains(key))
    }

    pub fn selection_len(&self) -> usize {
        self.dataset.as_ref().map_or(0, |d| d.selection.len())
    }

    /// Write the absolute paths of the selected videos to `dest`, one per
    /// line, sorted. Nothing is written for an empty selection.
    pub fn export_selection(&self, dest: &Path) -> Result<usize> {
        let dataset = self.dataset.as_ref().ok_or(CatalogError::NoDataset)?;
        if dataset.selection.is_empty() {
            return Ok(0);
        }

        let mut paths: Vec<String> = dataset
            .selection
            .iter()
            .map(|key| dataset.store.layout().absolute(key).display().to_string())
            .collect();
        paths.sort();

        let mut text = paths.join("\n");
        text.push('\n');
        atomic_write(dest, text.as_bytes()).map_err(|e| CatalogError::persistence(dest, e))?;
        info!("📤 Exported {} paths to {}", paths.len(), dest.display());
        Ok(paths.len())
    }

    pub fn absolute_path(&self, key: &RelKey) -> Option<PathBuf> {
        self.store().map(|store| store.layout().absolute(key))
    }

    /// Open the video in the default player
    pub fn open_video(&self, key: &RelKey, launcher: &dyn MediaLauncher) -> Result<()> {
        let path = self.absolute_path(key).ok_or(CatalogError::NoDataset)?;
        launcher.open(&path)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.store().is_some_and(MetadataStore::is_dirty) {
            warn!("⚠️  Closing with unsaved metadata changes");
        }
    }
}
