//! Streaming media fetcher
//!
//! Merges what the platform catalog knows with what is actually on disk and
//! hands the result out progressively:
//! - bucketed fetches sort newest-first and stream in batches, a small first
//!   batch for fast first paint and fixed-size batches after it
//! - whole-device fetches walk depth-first and emit each directory's files
//!   before descending
//!
//! Items come from the catalog record when one exists and from a direct probe
//! otherwise. Probed paths are submitted for reindexing once a bucketed fetch
//! finishes.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::ops::{ControlFlow, Range};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::error::Result;
use crate::platform::{IndexedRecord, PlatformIndexBridge};
use crate::scan::{FilesystemScanner, MediaProbe};
use crate::state::data::MediaItem;

#[derive(Debug, Clone)]
pub struct StreamingMediaFetcher {
    bridge: PlatformIndexBridge,
    scanner: FilesystemScanner,
    probe: MediaProbe,
    first_batch_size: usize,
    batch_size: usize,
}

impl StreamingMediaFetcher {
    pub fn new(
        bridge: PlatformIndexBridge,
        scanner: FilesystemScanner,
        probe: MediaProbe,
        config: &IndexConfig,
    ) -> Self {
        Self {
            bridge,
            scanner,
            probe,
            first_batch_size: config.first_batch_size.max(1),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Stream the media of exactly `folders` (non-recursive), newest first.
    pub fn fetch_folders(&self, folders: Vec<PathBuf>) -> ReceiverStream<Vec<MediaItem>> {
        let (tx, rx) = mpsc::channel(2);
        let fetcher = self.clone();
        tokio::spawn(async move {
            if let Err(err) = fetcher.stream_folders(folders, tx).await {
                warn!("Bucketed fetch aborted: {}", err);
            }
        });
        ReceiverStream::new(rx)
    }

    /// Stream every visitable media file under the root in traversal order.
    pub fn fetch_all(&self) -> ReceiverStream<MediaItem> {
        let (tx, rx) = mpsc::channel(self.batch_size);
        let fetcher = self.clone();
        tokio::spawn(async move {
            let indexed = fetcher.bridge.query_all(None).await;
            let scanner = fetcher.scanner.clone();
            let probe = fetcher.probe.clone();

            let walk = tokio::task::spawn_blocking(move || {
                let mut sent = 0usize;
                scanner.walk_depth_first(|_, files| {
                    for path in files {
                        let item = match indexed.get(&path) {
                            Some(record) => Some(MediaItem::from_indexed(record)),
                            None => probe.probe(&path),
                        };
                        let Some(item) = item else {
                            continue;
                        };
                        if tx.blocking_send(item).is_err() {
                            // Consumer went away
                            return ControlFlow::Break(());
                        }
                        sent += 1;
                    }
                    ControlFlow::Continue(())
                });
                sent
            });

            match walk.await {
                Ok(sent) => debug!("Device walk streamed {} items", sent),
                Err(err) => warn!("Device walk failed: {}", err),
            }
        });
        ReceiverStream::new(rx)
    }

    async fn stream_folders(self, folders: Vec<PathBuf>, tx: mpsc::Sender<Vec<MediaItem>>) -> Result<()> {
        let indexed = Arc::new(self.bridge.query_all(Some(&folders)).await);

        let ordered = {
            let scanner = self.scanner.clone();
            let indexed = Arc::clone(&indexed);
            tokio::task::spawn_blocking(move || newest_first(&scanner, &folders, &indexed)).await?
        };
        debug!("Bucketed fetch resolved {} files", ordered.len());

        let ordered = Arc::new(ordered);
        let mut fallbacks = Vec::new();
        for range in batch_ranges(ordered.len(), self.first_batch_size, self.batch_size) {
            let (items, probed) = {
                let ordered = Arc::clone(&ordered);
                let indexed = Arc::clone(&indexed);
                let probe = self.probe.clone();
                tokio::task::spawn_blocking(move || build_batch(&ordered[range], &indexed, &probe)).await?
            };
            fallbacks.extend(probed);
            if items.is_empty() {
                continue;
            }
            if tx.send(items).await.is_err() {
                debug!("Bucketed fetch consumer dropped");
                break;
            }
        }

        if !fallbacks.is_empty() {
            debug!("Scheduling reindex of {} unindexed files", fallbacks.len());
            self.bridge.reindex_in_background(fallbacks);
        }
        Ok(())
    }
}

/// Union of listed and indexed paths that still exist, newest-modified first
/// with the path as tie-break.
fn newest_first(
    scanner: &FilesystemScanner,
    folders: &[PathBuf],
    indexed: &HashMap<PathBuf, IndexedRecord>,
) -> Vec<PathBuf> {
    let mut candidates: BTreeSet<PathBuf> = indexed.keys().cloned().collect();
    for folder in folders {
        candidates.extend(scanner.list_media_files(folder));
    }

    let mut live: Vec<(PathBuf, SystemTime)> = candidates
        .into_iter()
        .filter_map(|path| {
            let metadata = fs::metadata(&path).ok()?;
            if !metadata.is_file() {
                return None;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    live.sort_by(|(a_path, a_time), (b_path, b_time)| b_time.cmp(a_time).then_with(|| a_path.cmp(b_path)));
    live.into_iter().map(|(path, _)| path).collect()
}

/// Returns the built items and the paths that needed a direct probe.
fn build_batch(
    paths: &[PathBuf],
    indexed: &HashMap<PathBuf, IndexedRecord>,
    probe: &MediaProbe,
) -> (Vec<MediaItem>, Vec<PathBuf>) {
    let mut items = Vec::with_capacity(paths.len());
    let mut probed = Vec::new();
    for path in paths {
        match indexed.get(path) {
            Some(record) => items.push(MediaItem::from_indexed(record)),
            None => {
                if let Some(item) = probe.probe(path) {
                    items.push(item);
                    probed.push(path.clone());
                }
            }
        }
    }
    (items, probed)
}

/// Split `len` items into a `first`-sized batch followed by `rest`-sized ones.
fn batch_ranges(len: usize, first: usize, rest: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut size = first;
    while start < len {
        let end = (start + size).min(len);
        ranges.push(start..end);
        start = end;
        size = rest;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::{InMemoryCatalog, ScanBehavior};
    use crate::scan::ScanRules;
    use futures::StreamExt;
    use std::collections::HashSet;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fetcher_for(root: &Path, catalog: Arc<InMemoryCatalog>) -> StreamingMediaFetcher {
        let config = IndexConfig::for_root(root);
        StreamingMediaFetcher::new(
            PlatformIndexBridge::new(catalog),
            FilesystemScanner::new(ScanRules::from_config(&config, HashSet::new())),
            MediaProbe::default(),
            &config,
        )
    }

    /// Write `path` and pin its mtime `age_secs` before now.
    fn write_aged(path: &Path, age_secs: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    #[test]
    fn test_batch_ranges() {
        assert_eq!(batch_ranges(23, 5, 20), vec![0..5, 5..23]);
        assert_eq!(batch_ranges(3, 5, 20), vec![0..3]);
        assert_eq!(batch_ranges(46, 5, 20), vec![0..5, 5..25, 25..45, 45..46]);
        assert!(batch_ranges(0, 5, 20).is_empty());
    }

    #[tokio::test]
    async fn test_twenty_three_files_stream_as_five_then_eighteen() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("Trip");
        for i in 0..23 {
            write_aged(&folder.join(format!("img{i:02}.jpg")), 10 + i);
        }
        let catalog = Arc::new(InMemoryCatalog::new());

        let batches: Vec<Vec<MediaItem>> = fetcher_for(dir.path(), catalog)
            .fetch_folders(vec![folder.clone()])
            .collect()
            .await;

        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, [5, 18]);
        // img00 is the newest
        assert_eq!(batches[0][0].display_name, "img00.jpg");
        assert_eq!(batches[1][17].display_name, "img22.jpg");
    }

    #[tokio::test]
    async fn test_indexed_records_are_preferred_and_stale_ones_dropped() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("Trip");
        let indexed_path = folder.join("indexed.jpg");
        write_aged(&indexed_path, 100);
        write_aged(&folder.join("fresh.jpg"), 1);

        let catalog = Arc::new(InMemoryCatalog::new());
        let mut record = InMemoryCatalog::record_for(&indexed_path, 0);
        record.width = 1080;
        record.height = 1920;
        record.orientation = 90;
        catalog.insert(record);
        catalog.insert(InMemoryCatalog::record_for(folder.join("deleted.jpg"), 0));

        let items: Vec<MediaItem> = fetcher_for(dir.path(), catalog)
            .fetch_folders(vec![folder.clone()])
            .flat_map(futures::stream::iter)
            .collect()
            .await;

        let names: Vec<_> = items.iter().map(|item| item.display_name.as_str()).collect();
        assert_eq!(names, ["fresh.jpg", "indexed.jpg"]);
        assert!(items[1].uri.starts_with("content://"));
        assert_eq!((items[1].width, items[1].height), (1920, 1080));
        assert!(items[0].uri.starts_with("file://"));
    }

    #[tokio::test]
    async fn test_fetch_is_not_recursive() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("Trip");
        write_aged(&folder.join("a.jpg"), 1);
        write_aged(&folder.join("Nested/b.jpg"), 1);
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert(InMemoryCatalog::record_for(folder.join("Nested/b.jpg"), 0));

        let items: Vec<MediaItem> = fetcher_for(dir.path(), catalog)
            .fetch_folders(vec![folder])
            .flat_map(futures::stream::iter)
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].display_name, "a.jpg");
    }

    #[tokio::test]
    async fn test_probed_files_are_reindexed_afterwards() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("Trip");
        let known = folder.join("known.jpg");
        let unknown = folder.join("unknown.jpg");
        write_aged(&known, 5);
        write_aged(&unknown, 1);
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.set_scan_behavior(ScanBehavior::Never);
        catalog.insert(InMemoryCatalog::record_for(&known, 0));

        let _: Vec<_> = fetcher_for(dir.path(), catalog.clone())
            .fetch_folders(vec![folder])
            .collect()
            .await;

        let mut requests = catalog.scan_requests();
        for _ in 0..50 {
            if !requests.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            requests = catalog.scan_requests();
        }
        assert_eq!(requests, vec![vec![unknown]]);
    }

    #[tokio::test]
    async fn test_catalog_failure_falls_back_to_disk() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("Trip");
        write_aged(&folder.join("a.jpg"), 1);
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert(InMemoryCatalog::record_for(folder.join("a.jpg"), 0));
        catalog.fail_queries(true);

        let items: Vec<MediaItem> = fetcher_for(dir.path(), catalog)
            .fetch_folders(vec![folder])
            .flat_map(futures::stream::iter)
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(items[0].uri.starts_with("file://"));
    }

    #[tokio::test]
    async fn test_fetch_all_walks_depth_first() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_aged(&root.join("a/1.jpg"), 1);
        write_aged(&root.join("a/x/2.jpg"), 1);
        write_aged(&root.join("b/3.mp4"), 1);
        write_aged(&root.join(".hidden/4.jpg"), 1);
        write_aged(&root.join("SortStaging/5.jpg"), 1);
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert(InMemoryCatalog::record_for(root.join("b/3.mp4"), 0));

        let items: Vec<MediaItem> = fetcher_for(root, catalog).fetch_all().collect().await;

        let names: Vec<_> = items.iter().map(|item| item.display_name.as_str()).collect();
        assert_eq!(names, ["1.jpg", "2.jpg", "3.mp4"]);
        assert!(items[2].uri.starts_with("content://"));
    }

    #[tokio::test]
    async fn test_fetch_all_stops_when_dropped() {
        let dir = TempDir::new().unwrap();
        for i in 0..50 {
            write_aged(&dir.path().join(format!("d{i:02}/f.jpg")), 1);
        }
        let catalog = Arc::new(InMemoryCatalog::new());

        let first: Vec<MediaItem> = fetcher_for(dir.path(), catalog)
            .fetch_all()
            .take(3)
            .collect()
            .await;

        assert_eq!(first.len(), 3);
        assert_eq!(first[0].path, dir.path().join("d00/f.jpg"));
    }
}
