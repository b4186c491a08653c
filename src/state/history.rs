//! Timestamped history of the metadata file
//!
//! Every successful save is followed by a copy of the freshly written file
//! into `.data/history/`. History files are write-once: nothing in the crate
//! ever modifies or deletes them.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::error::{CatalogError, Result};

/// Prefix shared by all history file names
pub const HISTORY_PREFIX: &str = "video_metadata_";
const HISTORY_EXTENSION: &str = ".json";
/// Sortable, second-resolution timestamp used in file names
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Saves within the same second get `_001` .. `_999`
const MAX_SAME_SECOND: u32 = 999;

/// Copy `json_path` into `history_dir`, named by the current UTC time
pub fn snapshot(json_path: &Path, history_dir: &Path) -> Result<PathBuf> {
    snapshot_at(json_path, history_dir, Utc::now().naive_utc())
}

/// Copy `json_path` into `history_dir`, named by `timestamp`.
///
/// If a record for the same second already exists the copy gets a numeric
/// suffix instead. Files are opened with `create_new`, so an existing record
/// is never overwritten, even by a concurrent writer.
pub fn snapshot_at(json_path: &Path, history_dir: &Path, timestamp: NaiveDateTime) -> Result<PathBuf> {
    fs::create_dir_all(history_dir).map_err(|e| CatalogError::persistence(history_dir, e))?;

    let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
    let mut source = File::open(json_path).map_err(|e| CatalogError::persistence(json_path, e))?;

    for attempt in 0..=MAX_SAME_SECOND {
        let name = if attempt == 0 {
            format!("{HISTORY_PREFIX}{stamp}{HISTORY_EXTENSION}")
        } else {
            format!("{HISTORY_PREFIX}{stamp}_{attempt:03}{HISTORY_EXTENSION}")
        };
        let target = history_dir.join(name);

        let mut dest = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(CatalogError::persistence(&target, e)),
        };

        if let Err(e) = io::copy(&mut source, &mut dest).and_then(|_| dest.sync_all()) {
            // Never leave a truncated record behind
            drop(dest);
            let _ = fs::remove_file(&target);
            return Err(CatalogError::persistence(&target, e));
        }

        info!("🗂️  History snapshot {}", target.display());
        return Ok(target);
    }

    warn!("⚠️  Too many history snapshots within {}", stamp);
    Err(CatalogError::persistence(
        history_dir,
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("more than {MAX_SAME_SECOND} snapshots in second {stamp}"),
        ),
    ))
}

/// All history records, newest first. A missing directory means no history.
pub fn list_history(history_dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = match fs::read_dir(history_dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CatalogError::persistence(history_dir, e)),
    };

    let mut records: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_history_file(path))
        .collect();

    // Names embed a fixed-width timestamp, so name order is save order
    records.sort();
    records.reverse();
    Ok(records)
}

fn is_history_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(HISTORY_PREFIX) && name.ends_with(HISTORY_EXTENSION))
}
