//! Relative-path keys and the on-disk layout of a dataset
//!
//! Metadata never stores absolute paths. Every video is identified by its
//! path relative to the dataset root, written with `/` separators, so the
//! catalog keeps working after the dataset is moved or mounted elsewhere.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{CatalogError, Result};

/// Hidden directory inside the dataset root holding everything we write
pub const DATA_DIR_NAME: &str = ".data";
/// Primary metadata file inside `.data/`
pub const METADATA_FILENAME: &str = "video_metadata.json";
/// Timestamped copies of the metadata file
pub const HISTORY_DIR_NAME: &str = "history";
/// Cached preview frames
pub const PREVIEWS_DIR_NAME: &str = "previews";

/// Canonical dataset-relative key, e.g. `"clips/day1/take3.mp4"`.
///
/// Always non-empty, `/`-separated, with no `.`/`..` segments and no
/// leading separator or drive prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelKey(String);

impl RelKey {
    /// Validate a key read from the metadata file.
    ///
    /// Backslash separators (written by older Windows saves) are accepted and
    /// rewritten to `/`; empty and `.` segments are dropped.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason| CatalogError::InvalidKey {
            key: raw.to_string(),
            reason,
        };

        let unified = raw.replace('\\', "/");
        if unified.starts_with('/') || has_drive_prefix(&unified) {
            return Err(invalid("absolute path"));
        }

        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(invalid("escapes the dataset root")),
                other => segments.push(other),
            }
        }

        if segments.is_empty() {
            return Err(invalid("empty key"));
        }

        Ok(RelKey(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment (the file name)
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for RelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RelKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// `C:` or `C:/...`; a colon later in a file name (`a:take.mp4`) is fine
fn has_drive_prefix(key: &str) -> bool {
    let bytes = key.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/')
}

/// Compute the key of `path` relative to `root`.
///
/// Fails with `InvalidPath` when `path` is not inside `root` (or is the root
/// itself). Paths are compared lexically first; if that fails both sides are
/// canonicalized, which covers roots reached through a symlink.
pub fn to_key(root: &Path, path: &Path) -> Result<RelKey> {
    let outside = || CatalogError::InvalidPath {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
    };

    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let (Ok(root_c), Ok(path_c)) = (root.canonicalize(), path.canonicalize()) else {
                return Err(outside());
            };
            path_c.strip_prefix(&root_c).map_err(|_| outside())?.to_path_buf()
        }
    };

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| CatalogError::InvalidKey {
                    key: rel.to_string_lossy().into_owned(),
                    reason: "not valid UTF-8",
                })?;
                if name.contains('\\') {
                    return Err(CatalogError::InvalidKey {
                        key: rel.to_string_lossy().into_owned(),
                        reason: "file name contains a backslash",
                    });
                }
                segments.push(name);
            }
            Component::CurDir => {}
            _ => return Err(outside()),
        }
    }

    if segments.is_empty() {
        return Err(outside());
    }

    // Same validation as keys read back from disk, so every key we store can be loaded
    RelKey::parse(&segments.join("/"))
}

/// Inverse of [`to_key`]: join the key's segments onto `root`
pub fn to_absolute(root: &Path, key: &RelKey) -> PathBuf {
    key.segments().fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Where a dataset keeps its catalog files:
///
/// ```text
/// <root>/.data/video_metadata.json
/// <root>/.data/history/video_metadata_YYYYMMDD_HHMMSS.json
/// <root>/.data/previews/<md5(key)>.jpg
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DatasetLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir().join(METADATA_FILENAME)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir().join(HISTORY_DIR_NAME)
    }

    pub fn previews_dir(&self) -> PathBuf {
        self.data_dir().join(PREVIEWS_DIR_NAME)
    }

    pub fn key_for(&self, path: &Path) -> Result<RelKey> {
        to_key(&self.root, path)
    }

    pub fn absolute(&self, key: &RelKey) -> PathBuf {
        to_absolute(&self.root, key)
    }
}
