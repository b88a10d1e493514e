//! In-memory media catalog
//!
//! Deterministic stand-in for the platform index. Hosts without a platform
//! catalog (desktop, CLI) run on an empty one; tests seed it with records and
//! flip its failure modes.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::{bucket_key, CatalogError, IndexedRecord, MediaCatalog, ScanCallback};
use crate::scan::media_types;
use crate::state::data::display_name;

/// How the catalog answers scan requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanBehavior {
    /// Index the paths from disk and report each one straight away
    #[default]
    CompleteImmediately,
    /// Accept the request but never report completion
    Never,
    /// Refuse to issue the request
    Fail,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    records: Mutex<HashMap<PathBuf, IndexedRecord>>,
    fail_queries: Mutex<bool>,
    scan_behavior: Mutex<ScanBehavior>,
    scan_requests: Mutex<Vec<Vec<PathBuf>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: IndexedRecord) {
        self.records.lock().insert(record.path.clone(), record);
    }

    pub fn remove(&self, path: &Path) {
        self.records.lock().remove(path);
    }

    pub fn fail_queries(&self, fail: bool) {
        *self.fail_queries.lock() = fail;
    }

    pub fn set_scan_behavior(&self, behavior: ScanBehavior) {
        *self.scan_behavior.lock() = behavior;
    }

    /// Every scan request received, in order
    pub fn scan_requests(&self) -> Vec<Vec<PathBuf>> {
        self.scan_requests.lock().clone()
    }

    /// A plausible record for `path`, with both timestamps at `modified_secs`.
    pub fn record_for(path: impl Into<PathBuf>, modified_secs: i64) -> IndexedRecord {
        let path = path.into();
        let when = Utc
            .timestamp_opt(modified_secs, 0)
            .single()
            .unwrap_or_default();
        let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
        IndexedRecord {
            uri: format!("content://media/external/file/{}", bucket_key(&path)),
            display_name: display_name(&path),
            mime_type: media_types::mime_type(&path).to_string(),
            date_added: when,
            date_modified: when,
            size: 0,
            bucket_id: bucket_key(&folder),
            bucket_name: display_name(&folder),
            is_video: media_types::is_video(&path),
            width: 0,
            height: 0,
            orientation: 0,
            path,
        }
    }

    fn record_from_disk(path: &Path) -> Option<IndexedRecord> {
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() || !media_types::is_media(path) {
            return None;
        }
        let modified = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        let mut record = Self::record_for(path, modified.timestamp());
        record.size = metadata.len();
        Some(record)
    }
}

#[async_trait]
impl MediaCatalog for InMemoryCatalog {
    async fn query(&self, buckets: Option<&HashSet<i32>>) -> Result<Vec<IndexedRecord>, CatalogError> {
        if *self.fail_queries.lock() {
            return Err(CatalogError::Unavailable("catalog offline".into()));
        }
        let records = self.records.lock();
        Ok(records
            .values()
            .filter(|record| buckets.map_or(true, |set| set.contains(&record.bucket_id)))
            .cloned()
            .collect())
    }

    async fn known_paths(&self) -> Result<Vec<PathBuf>, CatalogError> {
        if *self.fail_queries.lock() {
            return Err(CatalogError::Unavailable("catalog offline".into()));
        }
        Ok(self.records.lock().keys().cloned().collect())
    }

    fn request_scan(&self, paths: Vec<PathBuf>, on_scanned: ScanCallback) -> Result<(), CatalogError> {
        let behavior = *self.scan_behavior.lock();
        if behavior == ScanBehavior::Fail {
            return Err(CatalogError::ScanRequest("scanner unavailable".into()));
        }
        self.scan_requests.lock().push(paths.clone());
        if behavior == ScanBehavior::Never {
            return Ok(());
        }

        for path in &paths {
            match Self::record_from_disk(path) {
                Some(record) => self.insert(record),
                None => self.remove(path),
            }
            on_scanned(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scan_request_indexes_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        fs::write(&file, b"jpeg bytes").unwrap();

        let catalog = InMemoryCatalog::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        catalog
            .request_scan(
                vec![file.clone()],
                Arc::new(move |_: &Path| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let records = catalog.query(None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, 10);
        assert_eq!(records[0].bucket_id, bucket_key(dir.path()));
    }

    #[tokio::test]
    async fn test_never_behavior_records_but_does_not_complete() {
        let catalog = InMemoryCatalog::new();
        catalog.set_scan_behavior(ScanBehavior::Never);
        catalog
            .request_scan(vec![PathBuf::from("/x.jpg")], Arc::new(|_: &Path| panic!("no callback")))
            .unwrap();
        assert_eq!(catalog.scan_requests().len(), 1);
    }
}
