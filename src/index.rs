//! The folder index facade
//!
//! `FolderIndex` owns the durable store, the session caches and the catalog
//! bridge, and exposes the read paths:
//!
//! - `get_folders_with_details` falls through session memory, the durable
//!   store, then a full scan, promoting the result into the faster tiers on a
//!   hit
//! - `observe_folders_with_details` follows the durable store; when it is empty
//!   the first observer starts the full scan and every other observer waits on
//!   the same run
//!
//! plus the surgical write paths (rescan, invalidation, resume check) and the
//! streaming fetches.

use async_stream::stream;
use futures::{Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::fetch::StreamingMediaFetcher;
use crate::gate::StartGate;
use crate::platform::{MediaCatalog, PlatformIndexBridge};
use crate::scan::{FilesystemScanner, MediaProbe, ScanRules, SystemFolders};
use crate::state::data::{sort_folder_refs, sort_folders, FolderDetails, FolderRef, FolderUpdateEvent, MediaItem};
use crate::state::{FolderCacheStore, SessionCache, UserPreferences};
use crate::sync::{ChangeDetector, EventReconciler};

/// Capacity of the invalidation broadcast channel
const INVALIDATION_CAPACITY: usize = 16;

/// Broadcast to downstream consumers when cached folder data went stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    All,
    Paths(Vec<PathBuf>),
}

/// Outcome of the (memoized) full scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanOutcome {
    /// The durable store holds folders; its change notification carries them
    Populated,
    /// The tree holds no media at all
    Empty,
}

/// Read tiers, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheLevel {
    Session,
    Durable,
    FullScan,
}

impl CacheLevel {
    const READ_ORDER: [CacheLevel; 3] = [CacheLevel::Session, CacheLevel::Durable, CacheLevel::FullScan];
}

#[derive(Clone)]
pub struct FolderIndex {
    config: Arc<IndexConfig>,
    store: Arc<FolderCacheStore>,
    session: Arc<SessionCache>,
    bridge: PlatformIndexBridge,
    prefs: Arc<dyn UserPreferences>,
    system: Arc<SystemFolders>,
    probe: MediaProbe,
    gate: Arc<StartGate<ScanOutcome>>,
    invalidations: broadcast::Sender<Invalidation>,
}

impl fmt::Debug for FolderIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderIndex")
            .field("storage_root", &self.config.storage_root)
            .field("store", &self.store)
            .finish()
    }
}

impl FolderIndex {
    /// Open the index with its durable store at `config.database_path`.
    pub fn open(
        config: IndexConfig,
        catalog: Arc<dyn MediaCatalog>,
        prefs: Arc<dyn UserPreferences>,
    ) -> Result<Self> {
        config.validate()?;
        let store = FolderCacheStore::open(&config.database_path)?;
        Ok(Self::new(config, store, catalog, prefs))
    }

    pub fn new(
        config: IndexConfig,
        store: FolderCacheStore,
        catalog: Arc<dyn MediaCatalog>,
        prefs: Arc<dyn UserPreferences>,
    ) -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_CAPACITY);
        Self {
            system: Arc::new(SystemFolders::from_config(&config)),
            config: Arc::new(config),
            store: Arc::new(store),
            session: Arc::new(SessionCache::new()),
            bridge: PlatformIndexBridge::new(catalog),
            prefs,
            probe: MediaProbe::default(),
            gate: Arc::new(StartGate::new()),
            invalidations,
        }
    }

    /// Replace the fallback probe used for files the catalog does not know.
    pub fn with_probe(mut self, probe: MediaProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &FolderCacheStore {
        &self.store
    }

    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    /// Scanner honoring the current permanently-sorted set.
    pub fn scanner(&self) -> FilesystemScanner {
        FilesystemScanner::new(ScanRules::from_config(
            &self.config,
            self.prefs.permanently_sorted_paths(),
        ))
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<Invalidation> {
        self.invalidations.subscribe()
    }

    // ========== Full scan and observation ==========

    pub async fn get_folders_with_details(&self, force_refresh: bool) -> Result<Vec<FolderDetails>> {
        if force_refresh {
            info!("Forced refresh, dropping cached folders");
            self.store.run_blocking(|store| store.clear()).await?;
            self.session.invalidate_snapshot();
            self.session.invalidate_known_folders();
        }

        for level in CacheLevel::READ_ORDER {
            if let Some(folders) = self.read_level(level).await? {
                debug!("Served {} folders from {:?}", folders.len(), level);
                return Ok(folders);
            }
        }
        Ok(Vec::new())
    }

    async fn read_level(&self, level: CacheLevel) -> Result<Option<Vec<FolderDetails>>> {
        match level {
            CacheLevel::Session => Ok(self.session.snapshot().map(|snapshot| snapshot.folders)),
            CacheLevel::Durable => {
                let folders = self.store.run_blocking(|store| store.snapshot()).await?;
                if folders.is_empty() {
                    return Ok(None);
                }
                self.session.set_snapshot(folders.clone(), Vec::new());
                Ok(Some(folders))
            }
            CacheLevel::FullScan => match self.ensure_populated().await? {
                ScanOutcome::Empty => Ok(Some(Vec::new())),
                ScanOutcome::Populated => Ok(Some(self.store.run_blocking(|store| store.snapshot()).await?)),
            },
        }
    }

    /// Full details of every cached folder: the current table, then once per
    /// committed change. An empty table triggers a full scan; observers attached
    /// while it runs share that one scan.
    pub fn observe_folders_with_details(&self) -> impl Stream<Item = Vec<FolderDetails>> + Send + 'static {
        let index = self.clone();
        let mut rx = self.store.subscribe();
        stream! {
            loop {
                let current = rx.borrow_and_update().clone();
                if current.is_empty() {
                    match index.ensure_populated().await {
                        Ok(ScanOutcome::Empty) => {
                            yield Vec::new();
                        }
                        // The store notification delivers the scan result
                        Ok(ScanOutcome::Populated) => {}
                        Err(err) => {
                            warn!("Full scan failed: {}", err);
                            yield Vec::new();
                        }
                    }
                } else {
                    yield current;
                }

                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// (path, name) pairs of every cached folder, sorted case-insensitively by name.
    pub fn observe_folders(&self) -> impl Stream<Item = Vec<FolderRef>> + Send + 'static {
        self.observe_folders_with_details().map(|folders| {
            let mut refs: Vec<FolderRef> = folders.iter().map(FolderDetails::folder_ref).collect();
            sort_folder_refs(&mut refs);
            refs
        })
    }

    /// Callers that arrive while a scan runs share its outcome. Only a
    /// populated store is memoized: an empty result ends the shared run and the
    /// next read of an empty store scans again.
    async fn ensure_populated(&self) -> Result<ScanOutcome> {
        let outcome = self
            .gate
            .run(self.store.empty_epoch(), move || self.scan_and_persist())
            .await?;
        self.gate.forget_if(|memoized| *memoized == ScanOutcome::Empty);
        Ok(outcome)
    }

    async fn scan_and_persist(&self) -> Result<ScanOutcome> {
        if !self.store.run_blocking(|store| store.is_empty()).await? {
            return Ok(ScanOutcome::Populated);
        }

        info!("Folder cache empty, scanning {}", self.config.storage_root.display());
        let scanner = self.scanner();
        let processed = self.prefs.processed_paths();
        let system = Arc::clone(&self.system);
        let (folders, files, found) = tokio::task::spawn_blocking(move || {
            let found = scanner.media_folders();
            let mut paths: Vec<PathBuf> = found.iter().cloned().collect();
            paths.sort();
            let listing = scanner.folder_stats(&paths, &processed);
            let mut folders: Vec<FolderDetails> = listing
                .stats
                .into_iter()
                .filter(|stats| stats.item_count > 0)
                .map(|stats| system.tag(stats))
                .collect();
            sort_folders(&mut folders);
            (folders, listing.files, found)
        })
        .await?;

        info!("Full scan found {} folders with media", folders.len());
        self.session.set_known_folders(found);
        if folders.is_empty() {
            return Ok(ScanOutcome::Empty);
        }

        let folders = self
            .store
            .run_blocking(move |store| {
                store.upsert_all(&folders)?;
                Ok(folders)
            })
            .await?;
        self.session.set_snapshot(folders, files);
        Ok(ScanOutcome::Populated)
    }

    // ========== Surgical updates ==========

    /// Whether each path is an existing directory.
    pub async fn check_folders_exist(&self, paths: Vec<PathBuf>) -> Result<HashMap<PathBuf, bool>> {
        let checked = tokio::task::spawn_blocking(move || {
            paths
                .into_iter()
                .map(|path| {
                    let exists = path.is_dir();
                    (path, exists)
                })
                .collect()
        })
        .await?;
        Ok(checked)
    }

    /// Recompute one folder and write the result through every tier. Returns
    /// the new details, or `None` when the folder no longer holds countable
    /// media (its record is then deleted).
    pub async fn rescan_folder(&self, path: &Path) -> Result<Option<FolderDetails>> {
        let mut refreshed = self.refresh_folders(vec![path.to_path_buf()]).await?;
        Ok(refreshed.pop())
    }

    /// Drop every session cache and broadcast `Invalidation::All`.
    ///
    /// Unlike a forced refresh or a `FullRefreshRequired` event, this keeps the
    /// durable store: the next read is served from it instead of a full scan.
    /// Use `get_folders_with_details(true)` to drop the durable records too.
    pub fn invalidate_all(&self) {
        self.session.invalidate_all();
        let _ = self.invalidations.send(Invalidation::All);
    }

    /// Re-aggregate just `paths` and patch every tier with the result.
    pub async fn invalidate_paths(&self, paths: Vec<PathBuf>) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.refresh_folders(paths.clone()).await?;
        let _ = self.invalidations.send(Invalidation::Paths(paths));
        Ok(())
    }

    async fn refresh_folders(&self, paths: Vec<PathBuf>) -> Result<Vec<FolderDetails>> {
        let root = &self.config.storage_root;
        if let Some(outside) = paths.iter().find(|path| !path.starts_with(root)) {
            return Err(IndexError::OutsideRoot(outside.clone()));
        }

        let scanner = self.scanner();
        let processed = self.prefs.processed_paths();
        let system = Arc::clone(&self.system);
        let (upserts, deletes) = tokio::task::spawn_blocking(move || {
            let mut upserts = Vec::new();
            let mut deletes = Vec::new();
            for path in paths {
                let stats = if scanner.rules().admits(&path) {
                    scanner.rescan_folder(&path, &processed)
                } else {
                    None
                };
                match stats {
                    Some(stats) if stats.item_count > 0 => upserts.push(system.tag(stats)),
                    _ => deletes.push(path),
                }
            }
            (upserts, deletes)
        })
        .await?;

        let (upserts, deletes) = self
            .store
            .run_blocking(move |store| {
                store.delete_by_paths(&deletes)?;
                store.upsert_all(&upserts)?;
                Ok((upserts, deletes))
            })
            .await?;

        let updated: Vec<PathBuf> = upserts.iter().map(|folder| folder.path.clone()).collect();
        self.session.patch_snapshot(&upserts, &deletes);
        self.session.remove_known_folders(&deletes);
        self.session.add_known_folders(updated.iter().cloned());
        self.session.remove_empty_folders(&updated);
        debug!("Refreshed {} folders, removed {}", upserts.len(), deletes.len());
        Ok(upserts)
    }

    // ========== Empty folders ==========

    /// Folders under the root that hold no media. Computed on first call and
    /// cached for the session.
    pub async fn empty_folders(&self) -> Result<Vec<FolderRef>> {
        if let Some(cached) = self.session.empty_folders() {
            return Ok(cached);
        }
        let scanner = self.scanner();
        let computed = tokio::task::spawn_blocking(move || scanner.empty_folders()).await?;
        debug!("Found {} empty folders", computed.len());
        Ok(self.session.set_empty_folders_if_absent(computed))
    }

    /// Record a folder created elsewhere in the app. Returns whether the cached
    /// empty-folders list took it in.
    pub fn note_folder_created(&self, path: PathBuf, name: String) -> bool {
        self.session.insert_empty_folder(FolderRef { path, name })
    }

    // ========== Reconciliation ==========

    pub fn reconciler(&self) -> EventReconciler {
        EventReconciler::new(Arc::clone(&self.store), Arc::clone(&self.session))
    }

    /// Start the ordered update consumer; events sent on the returned channel
    /// are applied one at a time in arrival order.
    pub fn spawn_event_loop(&self) -> (mpsc::Sender<FolderUpdateEvent>, JoinHandle<()>) {
        self.reconciler().spawn(self.config.event_queue_capacity)
    }

    pub fn change_detector(&self) -> ChangeDetector {
        ChangeDetector::new(
            Arc::clone(&self.store),
            Arc::clone(&self.session),
            self.bridge.clone(),
            self.scanner(),
            Arc::clone(&self.system),
            self.prefs.processed_paths(),
        )
    }

    /// App-resume hook. Broadcasts an invalidation only when something changed.
    pub async fn handle_resume(&self) -> Result<bool> {
        let changed = self.change_detector().check_for_changes_and_invalidate().await?;
        if changed {
            info!("Folder changes detected on resume");
            let _ = self.invalidations.send(Invalidation::All);
        }
        Ok(changed)
    }

    pub async fn reindex_and_wait(&self, paths: Vec<PathBuf>, cancel: &CancellationToken) -> bool {
        self.bridge.reindex_and_wait(paths, cancel).await
    }

    // ========== Streaming fetches ==========

    fn fetcher(&self) -> StreamingMediaFetcher {
        StreamingMediaFetcher::new(self.bridge.clone(), self.scanner(), self.probe.clone(), &self.config)
    }

    pub fn fetch_folders(&self, folders: Vec<PathBuf>) -> ReceiverStream<Vec<MediaItem>> {
        self.fetcher().fetch_folders(folders)
    }

    pub fn fetch_all(&self) -> ReceiverStream<MediaItem> {
        self.fetcher().fetch_all()
    }

    /// Folders known to the session's last full scan, if one ran.
    pub fn known_folders(&self) -> Option<HashSet<PathBuf>> {
        self.session.known_folders()
    }
}
