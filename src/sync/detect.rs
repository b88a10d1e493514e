//! Change detection on resume
//!
//! A cheap reconciliation pass: cached folders that vanished are deleted, and
//! folders the platform catalog knows about but the cache does not are
//! rescanned one by one. No full tree walk.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::platform::PlatformIndexBridge;
use crate::scan::{FilesystemScanner, FolderStats, SystemFolders};
use crate::state::data::FolderDetails;
use crate::state::{FolderCacheStore, SessionCache};

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    store: Arc<FolderCacheStore>,
    session: Arc<SessionCache>,
    bridge: PlatformIndexBridge,
    scanner: FilesystemScanner,
    system: Arc<SystemFolders>,
    processed: Arc<HashSet<PathBuf>>,
}

/// Filesystem findings, gathered off the async runtime
struct Findings {
    missing: Vec<PathBuf>,
    rescanned: Vec<(PathBuf, Option<FolderStats>)>,
}

impl ChangeDetector {
    pub fn new(
        store: Arc<FolderCacheStore>,
        session: Arc<SessionCache>,
        bridge: PlatformIndexBridge,
        scanner: FilesystemScanner,
        system: Arc<SystemFolders>,
        processed: HashSet<PathBuf>,
    ) -> Self {
        Self {
            store,
            session,
            bridge,
            scanner,
            system,
            processed: Arc::new(processed),
        }
    }

    /// Returns whether anything changed. When it did, the session snapshot and
    /// the empty-folders list are dropped. An unchanged run writes nothing to
    /// the durable store.
    pub async fn check_for_changes_and_invalidate(&self) -> Result<bool> {
        let cached = self.store.run_blocking(|store| store.paths()).await?;
        if cached.is_empty() {
            debug!("Folder cache empty, nothing to reconcile");
            return Ok(false);
        }

        let catalog_folders = self.bridge.known_folders().await;
        let mut baseline = self.session.known_folders().unwrap_or_default();
        baseline.extend(cached.iter().cloned());

        let scanner = self.scanner.clone();
        let processed = Arc::clone(&self.processed);
        let findings = {
            let baseline = baseline.clone();
            tokio::task::spawn_blocking(move || {
                let missing: Vec<PathBuf> = cached.into_iter().filter(|path| !path.is_dir()).collect();
                let rescanned = catalog_folders
                    .into_iter()
                    .filter(|folder| !baseline.contains(folder) && scanner.rules().admits(folder))
                    .map(|folder| {
                        let stats = scanner.rescan_folder(&folder, &processed);
                        (folder, stats)
                    })
                    .collect();
                Findings { missing, rescanned }
            })
            .await?
        };

        let mut changed = false;
        if !findings.missing.is_empty() {
            let missing = findings.missing.clone();
            let deleted = self
                .store
                .run_blocking(move |store| store.delete_by_paths(&missing))
                .await?;
            info!("Removed {} folders that no longer exist", deleted);
            changed = true;
        }

        let fresh: Vec<FolderDetails> = findings
            .rescanned
            .iter()
            .filter_map(|(_, stats)| stats.clone())
            .filter(|stats| stats.item_count > 0)
            .map(|stats| self.system.tag(stats))
            .collect();
        if !fresh.is_empty() {
            let picked_up = fresh.len();
            self.store.run_blocking(move |store| store.upsert_all(&fresh)).await?;
            info!("Picked up {} new folders from the platform catalog", picked_up);
            changed = true;
        }

        // Rescanned folders join the baseline even when they held nothing
        // countable, so the next resume does not rescan them again
        baseline.extend(findings.rescanned.into_iter().map(|(folder, _)| folder));
        for missing in &findings.missing {
            baseline.remove(missing);
        }
        self.session.set_known_folders(baseline);

        if changed {
            self.session.invalidate_snapshot();
            self.session.invalidate_empty_folders();
        }
        Ok(changed)
    }
}
