/// Catalog state management
///
/// This module contains:
/// - Tag parsing and normalization
/// - The metadata entry model and its JSON form
/// - The metadata store (load, merge, save)
/// - Timestamped history snapshots

pub mod data;
pub mod history;
pub mod library;
pub mod tags;

pub use data::MetadataEntry;
pub use library::{LoadReport, MergeReport, MetadataStore};
pub use tags::{normalize, Tags};
