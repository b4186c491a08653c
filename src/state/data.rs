//! Shared data structures for the catalog state
//!
//! `MetadataEntry` is the in-memory form handed to the UI; `EntryRecord` is
//! exactly what lands in `video_metadata.json`.

use serde::{Deserialize, Deserializer, Serialize};

use super::tags::Tags;

/// User-editable metadata for one video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataEntry {
    pub tags: Tags,
    pub notes: String,
}

impl MetadataEntry {
    pub fn new(raw_tags: &str, notes: &str) -> Self {
        MetadataEntry {
            tags: Tags::parse(raw_tags),
            notes: notes.trim().to_string(),
        }
    }

    /// True if neither tags nor notes were ever filled in
    pub fn is_blank(&self) -> bool {
        self.tags.is_empty() && self.notes.is_empty()
    }
}

/// On-disk value: `{"tags": "a; b", "notes": "..."}`
///
/// Missing or `null` fields read as empty strings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EntryRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub notes: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<&MetadataEntry> for EntryRecord {
    fn from(entry: &MetadataEntry) -> Self {
        EntryRecord {
            tags: entry.tags.to_string(),
            notes: entry.notes.clone(),
        }
    }
}

impl From<EntryRecord> for MetadataEntry {
    fn from(record: EntryRecord) -> Self {
        // Hand-edited files may carry non-canonical tag strings
        MetadataEntry {
            tags: Tags::parse(&record.tags),
            notes: record.notes,
        }
    }
}
