//! Batch access to the platform catalog
//!
//! Every failure here degrades instead of propagating: queries become empty
//! results (callers fall back to filesystem data) and reindex requests resolve
//! `false`.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{bucket_key, IndexedRecord, MediaCatalog, ScanCallback};

#[derive(Clone)]
pub struct PlatformIndexBridge {
    catalog: Arc<dyn MediaCatalog>,
}

impl fmt::Debug for PlatformIndexBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformIndexBridge")
            .field("catalog", &"dyn MediaCatalog")
            .finish()
    }
}

impl PlatformIndexBridge {
    pub fn new(catalog: Arc<dyn MediaCatalog>) -> Self {
        Self { catalog }
    }

    /// Fetch indexed records keyed by path, optionally restricted to exactly `folders`
    /// (non-recursive: matching is by bucket key, not by path prefix).
    pub async fn query_all(&self, folders: Option<&[PathBuf]>) -> HashMap<PathBuf, IndexedRecord> {
        let buckets: Option<HashSet<i32>> =
            folders.map(|folders| folders.iter().map(|f| bucket_key(f)).collect());

        if matches!(&buckets, Some(set) if set.is_empty()) {
            return HashMap::new();
        }

        match self.catalog.query(buckets.as_ref()).await {
            Ok(records) => {
                debug!("Catalog returned {} records", records.len());
                records
                    .into_iter()
                    .map(|record| (record.path.clone(), record))
                    .collect()
            }
            Err(err) => {
                warn!("Catalog query failed, using filesystem data only: {}", err);
                HashMap::new()
            }
        }
    }

    /// Every path the catalog knows about.
    pub async fn known_paths(&self) -> HashSet<PathBuf> {
        match self.catalog.known_paths().await {
            Ok(paths) => paths.into_iter().collect(),
            Err(err) => {
                warn!("Catalog path listing failed: {}", err);
                HashSet::new()
            }
        }
    }

    /// Known paths grouped by parent directory.
    pub async fn known_folders(&self) -> HashSet<PathBuf> {
        self.known_paths()
            .await
            .iter()
            .filter_map(|path| path.parent().map(Path::to_path_buf))
            .collect()
    }

    /// Request a rescan of `paths` and wait until every path has reported back.
    ///
    /// Returns `false` if the request could not be issued or `cancel` fired first.
    /// A cancelled wait leaves the platform request running.
    pub async fn reindex_and_wait(&self, paths: Vec<PathBuf>, cancel: &CancellationToken) -> bool {
        if paths.is_empty() {
            return true;
        }

        let total = paths.len();
        let (gate, done) = CompletionGate::new(total);
        let on_scanned: ScanCallback = {
            let gate = Arc::clone(&gate);
            Arc::new(move |_path: &Path| gate.count_down())
        };

        if let Err(err) = self.catalog.request_scan(paths, on_scanned) {
            warn!("Reindex request for {} paths failed: {}", total, err);
            gate.resolve(false);
        }

        tokio::select! {
            biased;
            result = done => result.unwrap_or(false),
            _ = cancel.cancelled() => {
                debug!("Reindex wait cancelled with {} paths outstanding", gate.remaining());
                false
            }
        }
    }

    /// Fire-and-forget reindex; the handle is only useful to tests.
    pub fn reindex_in_background(&self, paths: Vec<PathBuf>) -> JoinHandle<bool> {
        let bridge = self.clone();
        tokio::spawn(async move {
            let count = paths.len();
            let ok = bridge
                .reindex_and_wait(paths, &CancellationToken::new())
                .await;
            debug!("Background reindex of {} paths finished: {}", count, ok);
            ok
        })
    }
}

/// Decrementing gate that resolves at most once
struct CompletionGate {
    remaining: AtomicUsize,
    done: Mutex<Option<oneshot::Sender<bool>>>,
}

impl CompletionGate {
    fn new(count: usize) -> (Arc<Self>, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let gate = Arc::new(Self {
            remaining: AtomicUsize::new(count),
            done: Mutex::new(Some(tx)),
        });
        (gate, rx)
    }

    fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.resolve(true);
        }
    }

    fn resolve(&self, result: bool) {
        if let Some(tx) = self.done.lock().take() {
            // Receiver is gone if the waiter was cancelled
            let _ = tx.send(result);
        }
    }

    fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}
