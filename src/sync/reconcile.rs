//! Event reconciler
//!
//! Applies incremental change notifications to the durable store and the
//! session caches without rescanning. Events go through one bounded channel
//! and a single consumer task, so events for the same path are applied in
//! arrival order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::state::data::{FolderDelta, FolderDetails, FolderRef, FolderUpdateEvent};
use crate::state::{FolderCacheStore, SessionCache};

#[derive(Debug, Clone)]
pub struct EventReconciler {
    store: Arc<FolderCacheStore>,
    session: Arc<SessionCache>,
}

impl EventReconciler {
    pub fn new(store: Arc<FolderCacheStore>, session: Arc<SessionCache>) -> Self {
        Self { store, session }
    }

    pub fn apply(&self, event: &FolderUpdateEvent) -> Result<()> {
        match event {
            FolderUpdateEvent::BatchUpdate(deltas) => self.apply_deltas(deltas),
            FolderUpdateEvent::Added { path, name } => self.apply_added(path, name),
            FolderUpdateEvent::FullRefreshRequired => {
                self.store.clear()?;
                self.session.invalidate_all();
                info!("Full refresh requested, folder caches dropped");
                Ok(())
            }
        }
    }

    /// Start the consumer loop. It runs until every sender is dropped; a failed
    /// event is logged and the loop moves on to the next one. Each event is
    /// applied on the blocking pool and awaited before the next is taken.
    pub fn spawn(self, capacity: usize) -> (mpsc::Sender<FolderUpdateEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let reconciler = self.clone();
                match tokio::task::spawn_blocking(move || reconciler.apply(&event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!("Failed to apply folder update: {}", err),
                    Err(err) => error!("Folder update task failed: {}", err),
                }
            }
            debug!("Folder update channel closed");
        });
        (tx, handle)
    }

    fn apply_deltas(&self, deltas: &HashMap<PathBuf, FolderDelta>) -> Result<()> {
        let mut paths: Vec<&PathBuf> = deltas.keys().collect();
        paths.sort();

        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        for path in paths {
            let delta = deltas[path];
            let Some(current) = self.store.get(path)? else {
                debug!("No cached folder for {}, delta ignored", path.display());
                continue;
            };

            let count = to_signed(current.item_count).saturating_add(delta.item_count_change);
            if count <= 0 {
                deletes.push(path.clone());
                continue;
            }
            let size = to_signed(current.total_size)
                .saturating_add(delta.size_change)
                .max(0);
            upserts.push(FolderDetails {
                item_count: count as u64,
                total_size: size as u64,
                ..current
            });
        }

        if !deletes.is_empty() {
            self.store.delete_by_paths(&deletes)?;
        }
        self.store.upsert_all(&upserts)?;

        let updated: Vec<PathBuf> = upserts.iter().map(|folder| folder.path.clone()).collect();
        self.session.patch_snapshot(&upserts, &deletes);
        self.session.remove_known_folders(&deletes);
        self.session.remove_empty_folders(&updated);
        debug!(
            "Batch update applied: {} updated, {} removed",
            upserts.len(),
            deletes.len()
        );
        Ok(())
    }

    fn apply_added(&self, path: &Path, name: &str) -> Result<()> {
        if self.store.get(path)?.is_none() {
            let placeholder = FolderDetails::placeholder(path.to_path_buf(), name.to_string());
            self.store.upsert(&placeholder)?;
            self.session.patch_snapshot(std::slice::from_ref(&placeholder), &[]);
            self.session.add_known_folders([path.to_path_buf()]);
        }

        let inserted = self.session.insert_empty_folder(FolderRef {
            path: path.to_path_buf(),
            name: name.to_string(),
        });
        debug!("Folder added: {} (empty list updated: {})", path.display(), inserted);
        Ok(())
    }
}

fn to_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (EventReconciler, Arc<FolderCacheStore>, Arc<SessionCache>) {
        let store = Arc::new(FolderCacheStore::open_in_memory().unwrap());
        let session = Arc::new(SessionCache::new());
        let reconciler = EventReconciler::new(Arc::clone(&store), Arc::clone(&session));
        (reconciler, store, session)
    }

    fn folder(path: &str, count: u64, size: u64) -> FolderDetails {
        FolderDetails {
            item_count: count,
            total_size: size,
            ..FolderDetails::placeholder(PathBuf::from(path), crate::state::data::display_name(Path::new(path)))
        }
    }

    fn batch(entries: &[(&str, i64, i64)]) -> FolderUpdateEvent {
        FolderUpdateEvent::BatchUpdate(
            entries
                .iter()
                .map(|(path, count, size)| {
                    (
                        PathBuf::from(path),
                        FolderDelta {
                            item_count_change: *count,
                            size_change: *size,
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_delta_to_zero_removes_folder() {
        let (reconciler, store, _) = setup();
        store.upsert(&folder("/storage/Trip", 5, 500)).unwrap();

        reconciler.apply(&batch(&[("/storage/Trip", -5, -500)])).unwrap();

        assert_eq!(store.get(Path::new("/storage/Trip")).unwrap(), None);
    }

    #[test]
    fn test_size_is_clamped_at_zero() {
        let (reconciler, store, _) = setup();
        store.upsert(&folder("/storage/Trip", 5, 100)).unwrap();

        reconciler.apply(&batch(&[("/storage/Trip", -1, -400)])).unwrap();

        let updated = store.get(Path::new("/storage/Trip")).unwrap().unwrap();
        assert_eq!((updated.item_count, updated.total_size), (4, 0));
    }

    #[test]
    fn test_unknown_paths_are_ignored() {
        let (reconciler, store, _) = setup();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        reconciler.apply(&batch(&[("/storage/Nowhere", 3, 30)])).unwrap();

        assert!(store.is_empty().unwrap());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_batch_writes_once_per_kind() {
        let (reconciler, store, _) = setup();
        store
            .upsert_all(&[
                folder("/storage/a", 2, 20),
                folder("/storage/b", 2, 20),
                folder("/storage/c", 2, 20),
            ])
            .unwrap();

        reconciler
            .apply(&batch(&[
                ("/storage/a", -2, -20),
                ("/storage/b", 3, 30),
                ("/storage/c", 1, 5),
            ]))
            .unwrap();

        let counts: Vec<_> = store
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|f| (f.name, f.item_count))
            .collect();
        assert_eq!(counts, [("b".to_string(), 5), ("c".to_string(), 3)]);
    }

    #[test]
    fn test_added_then_delta_fills_placeholder() {
        let (reconciler, store, _) = setup();

        reconciler
            .apply(&FolderUpdateEvent::Added {
                path: PathBuf::from("/storage/New"),
                name: "New".to_string(),
            })
            .unwrap();
        let placeholder = store.get(Path::new("/storage/New")).unwrap().unwrap();
        assert_eq!(placeholder.item_count, 0);
        assert!(!placeholder.is_system);

        reconciler.apply(&batch(&[("/storage/New", 3, 300)])).unwrap();

        let filled = store.get(Path::new("/storage/New")).unwrap().unwrap();
        assert_eq!((filled.item_count, filled.total_size), (3, 300));
    }

    #[test]
    fn test_added_keeps_existing_record() {
        let (reconciler, store, _) = setup();
        store.upsert(&folder("/storage/Trip", 4, 40)).unwrap();

        reconciler
            .apply(&FolderUpdateEvent::Added {
                path: PathBuf::from("/storage/Trip"),
                name: "Trip".to_string(),
            })
            .unwrap();

        assert_eq!(store.get(Path::new("/storage/Trip")).unwrap().unwrap().item_count, 4);
    }

    #[test]
    fn test_added_updates_populated_empty_list() {
        let (reconciler, _, session) = setup();
        session.set_empty_folders_if_absent(vec![FolderRef::new("/storage/zeta")]);

        reconciler
            .apply(&FolderUpdateEvent::Added {
                path: PathBuf::from("/storage/alpha"),
                name: "alpha".to_string(),
            })
            .unwrap();

        let names: Vec<_> = session
            .empty_folders()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }

    #[test]
    fn test_full_refresh_drops_everything() {
        let (reconciler, store, session) = setup();
        store.upsert(&folder("/storage/Trip", 4, 40)).unwrap();
        session.set_snapshot(store.snapshot().unwrap(), Vec::new());
        session.set_empty_folders_if_absent(Vec::new());

        reconciler.apply(&FolderUpdateEvent::FullRefreshRequired).unwrap();

        assert!(store.is_empty().unwrap());
        assert!(session.snapshot().is_none());
        assert!(session.empty_folders().is_none());
        assert_eq!(store.empty_epoch(), 1);
    }

    #[test]
    fn test_snapshot_follows_batch() {
        let (reconciler, store, session) = setup();
        store
            .upsert_all(&[folder("/storage/a", 1, 10), folder("/storage/b", 1, 10)])
            .unwrap();
        session.set_snapshot(store.snapshot().unwrap(), Vec::new());

        reconciler
            .apply(&batch(&[("/storage/a", -1, -10), ("/storage/b", 1, 10)]))
            .unwrap();

        assert_eq!(session.snapshot().unwrap().folders, store.snapshot().unwrap());
    }

    #[tokio::test]
    async fn test_event_loop_applies_in_order() {
        let (reconciler, store, _) = setup();
        let (tx, handle) = reconciler.spawn(8);

        tx.send(FolderUpdateEvent::Added {
            path: PathBuf::from("/storage/New"),
            name: "New".to_string(),
        })
        .await
        .unwrap();
        tx.send(batch(&[("/storage/New", 3, 30)])).await.unwrap();
        tx.send(batch(&[("/storage/New", 2, 20)])).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let folder = store.get(Path::new("/storage/New")).unwrap().unwrap();
        assert_eq!((folder.item_count, folder.total_size), (5, 50));
    }
}
