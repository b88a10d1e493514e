//! Process-lifetime caches
//!
//! Three independent entries, each behind its own lock:
//! - the last full folder snapshot together with the raw file list behind it
//! - the folder-path set found by the last full scan
//! - the (expensive) empty-folders list
//!
//! Writers that read before they write (the surgical paths) do both under a
//! single lock acquisition, so concurrent folder-added notifications cannot
//! lose an insert.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;

use super::data::{sort_folder_refs, sort_folders, DiscoveredFile, FolderDetails, FolderRef};

/// Result of the last full computation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FolderSnapshot {
    pub folders: Vec<FolderDetails>,
    pub files: Vec<DiscoveredFile>,
}

#[derive(Debug, Default)]
pub struct SessionCache {
    snapshot: Mutex<Option<FolderSnapshot>>,
    known_folders: Mutex<Option<HashSet<PathBuf>>>,
    empty_folders: Mutex<Option<Vec<FolderRef>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Full snapshot ==========

    pub fn snapshot(&self) -> Option<FolderSnapshot> {
        self.snapshot.lock().clone()
    }

    pub fn set_snapshot(&self, folders: Vec<FolderDetails>, files: Vec<DiscoveredFile>) {
        *self.snapshot.lock() = Some(FolderSnapshot { folders, files });
    }

    /// Mirror a durable-store batch into the snapshot, if one is held.
    pub fn patch_snapshot(&self, upserts: &[FolderDetails], deletes: &[PathBuf]) {
        let mut guard = self.snapshot.lock();
        let Some(snapshot) = guard.as_mut() else {
            return;
        };

        let touched: HashSet<&PathBuf> = deletes
            .iter()
            .chain(upserts.iter().map(|folder| &folder.path))
            .collect();
        snapshot.folders.retain(|folder| !touched.contains(&folder.path));
        snapshot.folders.extend(upserts.iter().cloned());
        sort_folders(&mut snapshot.folders);
    }

    pub fn invalidate_snapshot(&self) {
        *self.snapshot.lock() = None;
    }

    // ========== Last known folder set ==========

    pub fn known_folders(&self) -> Option<HashSet<PathBuf>> {
        self.known_folders.lock().clone()
    }

    pub fn set_known_folders(&self, folders: HashSet<PathBuf>) {
        *self.known_folders.lock() = Some(folders);
    }

    /// Add paths to the known set, if one is held.
    pub fn add_known_folders(&self, folders: impl IntoIterator<Item = PathBuf>) {
        if let Some(known) = self.known_folders.lock().as_mut() {
            known.extend(folders);
        }
    }

    pub fn remove_known_folders(&self, folders: &[PathBuf]) {
        if let Some(known) = self.known_folders.lock().as_mut() {
            for folder in folders {
                known.remove(folder);
            }
        }
    }

    pub fn invalidate_known_folders(&self) {
        *self.known_folders.lock() = None;
    }

    // ========== Empty folders ==========

    pub fn empty_folders(&self) -> Option<Vec<FolderRef>> {
        self.empty_folders.lock().clone()
    }

    /// Store a freshly computed list unless another caller got there first;
    /// returns whichever list is now cached.
    pub fn set_empty_folders_if_absent(&self, mut folders: Vec<FolderRef>) -> Vec<FolderRef> {
        let mut guard = self.empty_folders.lock();
        match guard.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                sort_folder_refs(&mut folders);
                *guard = Some(folders.clone());
                folders
            }
        }
    }

    /// Surgical insert for a newly created folder. Only applies when the list is
    /// populated and lacks the path; returns whether it was inserted.
    pub fn insert_empty_folder(&self, folder: FolderRef) -> bool {
        let mut guard = self.empty_folders.lock();
        let Some(list) = guard.as_mut() else {
            return false;
        };
        if list.iter().any(|existing| existing.path == folder.path) {
            return false;
        }
        list.push(folder);
        sort_folder_refs(list);
        true
    }

    /// Drop entries for folders that now hold media or no longer exist.
    pub fn remove_empty_folders(&self, paths: &[PathBuf]) {
        if let Some(list) = self.empty_folders.lock().as_mut() {
            list.retain(|folder| !paths.contains(&folder.path));
        }
    }

    pub fn invalidate_empty_folders(&self) {
        *self.empty_folders.lock() = None;
    }

    /// Drop all three entries.
    pub fn invalidate_all(&self) {
        self.invalidate_snapshot();
        self.invalidate_known_folders();
        self.invalidate_empty_folders();
    }
}
