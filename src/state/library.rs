use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::data::{EntryRecord, MetadataEntry};
use super::tags::Tags;
use crate::error::{CatalogError, Result};
use crate::paths::{DatasetLayout, RelKey};

/// Problems found while loading the metadata file.
///
/// None of these abort the load: bad entries are dropped, and an unparseable
/// file degrades to an empty catalog.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Entries dropped because their key or value was unusable
    pub rejected: Vec<CatalogError>,
    /// Set when the whole file had to be ignored
    pub malformed: Option<CatalogError>,
}

/// What `merge` changed
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Keys seen for the first time
    pub added: usize,
    /// Known keys that the scan did not find (kept, not deleted)
    pub retained_missing: usize,
    /// Scanned paths that could not be turned into keys
    pub rejected: Vec<CatalogError>,
}

/// The MetadataStore holds tags and notes for every known video of one dataset.
///
/// Keys are dataset-relative, so the store never contains absolute paths.
/// It is owned by the session and only ever mutated from the interactive
/// thread; the preview worker receives copies of the key list instead.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    layout: DatasetLayout,
    entries: BTreeMap<RelKey, MetadataEntry>,
    /// Keys found by the most recent merge
    present: BTreeSet<RelKey>,
    dirty: bool,
}

impl MetadataStore {
    /// Create an empty store bound to a dataset
    pub fn new(layout: DatasetLayout) -> Self {
        MetadataStore {
            layout,
            entries: BTreeMap::new(),
            present: BTreeSet::new(),
            dirty: false,
        }
    }

    /// Load `.data/video_metadata.json` for the dataset.
    ///
    /// A missing file yields an empty store. A file that exists but cannot be
    /// read at all is an error, so that a later save cannot silently replace
    /// data we never saw.
    pub fn load(layout: DatasetLayout) -> Result<(Self, LoadReport)> {
        let path = layout.metadata_path();
        let mut store = MetadataStore::new(layout);
        let mut report = LoadReport::default();

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No metadata file at {}, starting empty", path.display());
                return Ok((store, report));
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                report.malformed = Some(malformed(&path, e.to_string()));
                warn_malformed(&report);
                return Ok((store, report));
            }
            Err(e) => return Err(CatalogError::persistence(&path, e)),
        };

        let map = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => {
                report.malformed = Some(malformed(&path, "top-level value is not an object".into()));
                warn_malformed(&report);
                return Ok((store, report));
            }
            Err(e) => {
                report.malformed = Some(malformed(&path, e.to_string()));
                warn_malformed(&report);
                return Ok((store, report));
            }
        };

        for (raw_key, value) in map {
            let key = match RelKey::parse(&raw_key) {
                Ok(key) => key,
                Err(e) => {
                    warn!("⚠️  Dropping metadata entry: {}", e);
                    report.rejected.push(e);
                    continue;
                }
            };
            let record = match serde_json::from_value::<EntryRecord>(value) {
                Ok(record) => record,
                Err(e) => {
                    let e = malformed(&path, format!("entry {raw_key:?}: {e}"));
                    warn!("⚠️  Dropping metadata entry: {}", e);
                    report.rejected.push(e);
                    continue;
                }
            };
            if store.entries.contains_key(&key) {
                let e = CatalogError::InvalidKey {
                    key: raw_key,
                    reason: "duplicates an earlier key",
                };
                warn!("⚠️  Dropping metadata entry: {}, keeping the first", e);
                report.rejected.push(e);
                continue;
            }
            store.entries.insert(key, record.into());
        }

        info!(
            "📁 Loaded {} metadata entries from {} ({} dropped)",
            store.entries.len(),
            path.display(),
            report.rejected.len()
        );
        Ok((store, report))
    }

    /// Fold a scan result into the store.
    ///
    /// New videos get empty entries; existing entries are left untouched.
    /// Entries for videos the scan did not find are kept, so metadata for a
    /// temporarily missing file (unmounted drive, moved folder) survives.
    pub fn merge(&mut self, scanned: &[PathBuf]) -> MergeReport {
        let mut report = MergeReport::default();
        self.present.clear();

        for path in scanned {
            match self.layout.key_for(path) {
                Ok(key) => {
                    if !self.entries.contains_key(&key) {
                        self.entries.insert(key.clone(), MetadataEntry::default());
                        report.added += 1;
                    }
                    self.present.insert(key);
                }
                Err(e) => {
                    warn!("⚠️  Skipping scanned file: {}", e);
                    report.rejected.push(e);
                }
            }
        }

        report.retained_missing = self
            .entries
            .keys()
            .filter(|key| !self.present.contains(*key))
            .count();

        info!(
            "🔄 Merge: {} new, {} missing but retained, {} skipped",
            report.added,
            report.retained_missing,
            report.rejected.len()
        );
        report
    }

    /// Write the store to `.data/video_metadata.json`.
    ///
    /// The file is written to a temporary sibling and renamed into place, so
    /// an interrupted or failed save leaves the previous file intact.
    pub fn save(&mut self) -> Result<PathBuf> {
        let path = self.layout.metadata_path();
        let json = self
            .to_json()
            .map_err(|e| CatalogError::persistence(&path, io::Error::other(e)))?;

        fs::create_dir_all(self.layout.data_dir())
            .map_err(|e| CatalogError::persistence(self.layout.data_dir(), e))?;
        atomic_write(&path, json.as_bytes()).map_err(|e| CatalogError::persistence(&path, e))?;

        self.dirty = false;
        info!("💾 Saved {} entries to {}", self.entries.len(), path.display());
        Ok(path)
    }

    /// Serialize as the on-disk JSON object (keys sorted, 2-space indent)
    pub fn to_json(&self) -> serde_json::Result<String> {
        let records: BTreeMap<&str, EntryRecord> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.as_str(), EntryRecord::from(entry)))
            .collect();
        serde_json::to_string_pretty(&records)
    }

    /// Replace both tags and notes of an entry, inserting it if needed.
    ///
    /// Tags go through normalization; this and [`set_tags`](Self::set_tags)
    /// are the only ways tags change.
    pub fn update_entry(&mut self, key: &RelKey, raw_tags: &str, notes: &str) -> &MetadataEntry {
        self.dirty = true;
        let entry = self.entries.entry(key.clone()).or_default();
        *entry = MetadataEntry::new(raw_tags, notes);
        entry
    }

    /// Replace only the tags of an entry
    pub fn set_tags(&mut self, key: &RelKey, raw_tags: &str) -> &MetadataEntry {
        self.dirty = true;
        let entry = self.entries.entry(key.clone()).or_default();
        entry.tags = Tags::parse(raw_tags);
        entry
    }

    /// Replace only the notes of an entry
    pub fn set_notes(&mut self, key: &RelKey, notes: &str) -> &MetadataEntry {
        self.dirty = true;
        let entry = self.entries.entry(key.clone()).or_default();
        entry.notes = notes.trim().to_string();
        entry
    }

    /// Drop entries whose video was not found by the last merge.
    ///
    /// Never called implicitly; returns how many entries were removed.
    pub fn prune_missing(&mut self) -> usize {
        let before = self.entries.len();
        let present = &self.present;
        self.entries.retain(|key, _| present.contains(key));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.dirty = true;
            info!("🧹 Pruned {} entries for missing videos", removed);
        }
        removed
    }

    pub fn get(&self, key: &RelKey) -> Option<&MetadataEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&RelKey, &MetadataEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RelKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the last merge found this key on disk
    pub fn is_present(&self, key: &RelKey) -> bool {
        self.present.contains(key)
    }

    /// Keys found by the last merge, with their absolute paths
    pub fn present_videos(&self) -> Vec<(RelKey, PathBuf)> {
        self.present
            .iter()
            .map(|key| (key.clone(), self.layout.absolute(key)))
            .collect()
    }

    /// Unsaved edits exist
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    /// How many entries carry each tag
    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            for tag in entry.tags.iter() {
                *counts.entry(tag.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Tag counts, most used first, ties broken by name
    pub fn tag_counts_ranked(&self) -> Vec<(String, usize)> {
        let mut ranked: Vec<(String, usize)> = self.tag_counts().into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Number of entries with no tags at all
    pub fn untagged_count(&self) -> usize {
        self.entries.values().filter(|e| e.tags.is_empty()).count()
    }
}

fn malformed(path: &Path, reason: String) -> CatalogError {
    CatalogError::MalformedMetadata {
        path: path.to_path_buf(),
        reason,
    }
}

fn warn_malformed(report: &LoadReport) {
    if let Some(e) = &report.malformed {
        warn!("⚠️  {}; starting with an empty catalog", e);
    }
}

/// Write `bytes` to `path` via a `.tmp` sibling and a rename
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        // Data must be on disk before the rename makes it visible
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> RelKey {
        RelKey::parse(raw).unwrap()
    }

    fn write_metadata(layout: &DatasetLayout, json: &str) {
        fs::create_dir_all(layout.data_dir()).unwrap();
        fs::write(layout.metadata_path(), json).unwrap();
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (store, report) = MetadataStore::load(DatasetLayout::new(dir.path())).unwrap();
        assert!(store.is_empty());
        assert!(report.malformed.is_none());
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_load_malformed_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());

        write_metadata(&layout, "{ not json");
        let (store, report) = MetadataStore::load(layout.clone()).unwrap();
        assert!(store.is_empty());
        assert!(matches!(report.malformed, Some(CatalogError::MalformedMetadata { .. })));

        write_metadata(&layout, "[1, 2, 3]");
        let (store, report) = MetadataStore::load(layout).unwrap();
        assert!(store.is_empty());
        assert!(report.malformed.is_some());
    }

    #[test]
    fn test_load_drops_bad_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        write_metadata(
            &layout,
            r#"{
                "a/1.mp4": {"tags": "x", "notes": "keep"},
                "../escape.mp4": {"tags": "y", "notes": ""},
                "/abs/2.mp4": {"tags": "", "notes": ""},
                "b\\2.avi": {"tags": "one,two", "notes": null},
                "c/3.mkv": "not an object"
            }"#,
        );

        let (store, report) = MetadataStore::load(layout).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(report.rejected.len(), 3);
        assert_eq!(store.get(&key("a/1.mp4")).unwrap().notes, "keep");
        assert_eq!(store.get(&key("b/2.avi")).unwrap().tags.to_string(), "one; two");
    }

    #[test]
    fn test_load_reports_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        write_metadata(
            &layout,
            r#"{
                "a/1.mp4": {"tags": "first", "notes": ""},
                "a\\1.mp4": {"tags": "second", "notes": ""}
            }"#,
        );

        let (store, report) = MetadataStore::load(layout).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            &report.rejected[0],
            CatalogError::InvalidKey { key, .. } if key == "a\\1.mp4"
        ));
        assert_eq!(store.get(&key("a/1.mp4")).unwrap().tags.to_string(), "first");
    }

    #[test]
    fn test_merge_preserves_edits_and_retains_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut store = MetadataStore::new(DatasetLayout::new(root));
        store.update_entry(&key("k.mp4"), "x", "");

        let report = store.merge(&[root.join("k.mp4"), root.join("new.mov")]);
        assert_eq!(report.added, 1);
        assert_eq!(report.retained_missing, 0);
        assert_eq!(store.get(&key("k.mp4")).unwrap().tags.to_string(), "x");
        assert!(store.get(&key("new.mov")).unwrap().is_blank());

        let report = store.merge(&[root.join("new.mov")]);
        assert_eq!(report.added, 0);
        assert_eq!(report.retained_missing, 1);
        assert_eq!(store.get(&key("k.mp4")).unwrap().tags.to_string(), "x");
        assert!(!store.is_present(&key("k.mp4")));
        assert!(store.is_present(&key("new.mov")));
    }

    #[test]
    fn test_merge_rejects_outside_paths() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::new(DatasetLayout::new(dir.path()));

        let report = store.merge(&[other.path().join("x.mp4"), dir.path().join("y.mp4")]);
        assert_eq!(report.added, 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(report.rejected[0], CatalogError::InvalidPath { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let mut store = MetadataStore::new(layout.clone());
        store.update_entry(&key("a/1.mp4"), "real, train real", "first take");
        store.update_entry(&key("b/2.avi"), "", "");
        assert!(store.is_dirty());

        let path = store.save().unwrap();
        assert_eq!(path, layout.metadata_path());
        assert!(!store.is_dirty());

        let (loaded, report) = MetadataStore::load(layout.clone()).unwrap();
        assert!(report.rejected.is_empty());
        let before: Vec<_> = store.entries().collect();
        let after: Vec<_> = loaded.entries().collect();
        assert_eq!(before, after);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(layout.metadata_path()).unwrap()).unwrap();
        assert_eq!(raw["a/1.mp4"]["tags"], "real; train");
        assert_eq!(raw["a/1.mp4"]["notes"], "first take");
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let mut store = MetadataStore::new(layout.clone());
        store.update_entry(&key("a.mp4"), "old", "");
        store.save().unwrap();
        let previous = fs::read_to_string(layout.metadata_path()).unwrap();

        // A directory where the temp file should go makes the write fail
        fs::create_dir(layout.data_dir().join("video_metadata.json.tmp")).unwrap();
        store.update_entry(&key("a.mp4"), "new", "");
        let err = store.save().unwrap_err();

        assert!(matches!(err, CatalogError::Persistence { .. }));
        assert!(store.is_dirty());
        assert_eq!(fs::read_to_string(layout.metadata_path()).unwrap(), previous);
    }

    #[test]
    fn test_derived_views() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::new(DatasetLayout::new(dir.path()));
        store.set_tags(&key("1.mp4"), "cat dog");
        store.set_tags(&key("2.mp4"), "dog");
        store.set_notes(&key("3.mp4"), "  nothing tagged  ");

        assert_eq!(store.tag_counts().get("dog"), Some(&2));
        assert_eq!(
            store.tag_counts_ranked(),
            vec![("dog".to_string(), 2), ("cat".to_string(), 1)]
        );
        assert_eq!(store.untagged_count(), 1);
        assert_eq!(store.get(&key("3.mp4")).unwrap().notes, "nothing tagged");
    }

    #[test]
    fn test_prune_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut store = MetadataStore::new(DatasetLayout::new(root));
        store.set_tags(&key("gone.mp4"), "x");
        store.merge(&[root.join("here.mp4")]);

        assert_eq!(store.prune_missing(), 1);
        assert!(store.get(&key("gone.mp4")).is_none());
        assert!(store.get(&key("here.mp4")).is_some());
        assert_eq!(store.prune_missing(), 0);
    }
}
