//! Shared data structures for the folder index
//!
//! These structs represent the data model that flows between the scanner,
//! the durable store, the session caches and the streaming fetcher.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::platform::IndexedRecord;

/// Aggregate details for one folder holding media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderDetails {
    /// Absolute canonical directory path (unique key)
    pub path: PathBuf,
    /// Display name (last path component)
    pub name: String,
    /// Media files currently counted, excluding user-processed ones
    pub item_count: u64,
    /// Total byte size of the counted items
    pub total_size: u64,
    /// Standard public directory or conventional child of one
    pub is_system: bool,
    /// Canonical OS directory, used as a UI sort tie-break
    pub is_primary_system: bool,
}

impl FolderDetails {
    /// Zero-count record inserted when a folder is created elsewhere in the app.
    /// A later batch update or rescan fills it in.
    pub fn placeholder(path: PathBuf, name: String) -> Self {
        Self {
            path,
            name,
            item_count: 0,
            total_size: 0,
            is_system: false,
            is_primary_system: false,
        }
    }

    pub fn folder_ref(&self) -> FolderRef {
        FolderRef {
            path: self.path.clone(),
            name: self.name.clone(),
        }
    }
}

/// Persisted form of [`FolderDetails`], one row of the `folders` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub path: String,
    pub name: String,
    pub item_count: i64,
    pub total_size: i64,
    pub is_system: bool,
    pub is_primary_system: bool,
}

impl From<&FolderDetails> for FolderRecord {
    fn from(details: &FolderDetails) -> Self {
        Self {
            path: details.path.to_string_lossy().into_owned(),
            name: details.name.clone(),
            item_count: i64::try_from(details.item_count).unwrap_or(i64::MAX),
            total_size: i64::try_from(details.total_size).unwrap_or(i64::MAX),
            is_system: details.is_system,
            is_primary_system: details.is_primary_system,
        }
    }
}

impl From<FolderRecord> for FolderDetails {
    fn from(record: FolderRecord) -> Self {
        Self {
            path: PathBuf::from(record.path),
            name: record.name,
            item_count: u64::try_from(record.item_count).unwrap_or(0),
            total_size: u64::try_from(record.total_size).unwrap_or(0),
            is_system: record.is_system,
            is_primary_system: record.is_primary_system,
        }
    }
}

/// A (path, name) pair for a known folder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderRef {
    pub path: PathBuf,
    pub name: String,
}

impl FolderRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = display_name(&path);
        Self { path, name }
    }
}

/// Per-folder change carried by a batch update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FolderDelta {
    pub item_count_change: i64,
    pub size_change: i64,
}

/// Incremental change notifications consumed by the event reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderUpdateEvent {
    /// Count/size deltas per folder path
    BatchUpdate(HashMap<PathBuf, FolderDelta>),
    /// A folder was created elsewhere in the app
    Added { path: PathBuf, name: String },
    /// Cached state can no longer be patched; drop everything
    FullRefreshRequired,
}

/// A media file seen during a full scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// One photo or video, rebuilt on demand from the platform index or the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub path: PathBuf,
    /// Platform locator
    pub uri: String,
    pub display_name: String,
    pub mime_type: String,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub size: u64,
    /// Owning folder bucket key
    pub bucket_id: i32,
    pub bucket_name: String,
    pub is_video: bool,
    /// Width after applying stored rotation
    pub width: u32,
    /// Height after applying stored rotation
    pub height: u32,
}

impl MediaItem {
    /// Build from a catalog record, swapping width and height for 90°/270° rotations
    pub fn from_indexed(record: &IndexedRecord) -> Self {
        let (width, height) = oriented(record.width, record.height, record.orientation);
        Self {
            path: record.path.clone(),
            uri: record.uri.clone(),
            display_name: record.display_name.clone(),
            mime_type: record.mime_type.clone(),
            date_added: record.date_added,
            date_modified: record.date_modified,
            size: record.size,
            bucket_id: record.bucket_id,
            bucket_name: record.bucket_name.clone(),
            is_video: record.is_video,
            width,
            height,
        }
    }
}

/// Apply a stored rotation (degrees) to raw dimensions.
pub fn oriented(width: u32, height: u32, rotation: i32) -> (u32, u32) {
    match rotation.rem_euclid(360) {
        90 | 270 => (height, width),
        _ => (width, height),
    }
}

/// Last path component, or the whole path for roots.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Sort folders case-insensitively by name, path as tie-break.
pub fn sort_folders(folders: &mut [FolderDetails]) {
    folders.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Sort (path, name) pairs case-insensitively by name, path as tie-break.
pub fn sort_folder_refs(folders: &mut [FolderRef]) {
    folders.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.path.cmp(&b.path))
    });
}
