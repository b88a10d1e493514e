//! Filesystem scanner
//!
//! Walks the storage tree breadth-first with an explicit queue, so arbitrarily
//! deep trees never grow the call stack. Directories that fail to list are
//! skipped and the walk carries on.
//!
//! A directory is never visited (and nothing beneath it is) when its name
//! starts with a dot, equals the staging directory name, it sits under the
//! protected OS subtree, or the user marked it permanently sorted. The root
//! itself is exempt from the name rules.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::scan::media_types;
use crate::state::data::{display_name, sort_folder_refs, DiscoveredFile, FolderRef};

/// Exclusion rules shared by every walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRules {
    root: PathBuf,
    staging_name: String,
    protected: PathBuf,
    permanently_sorted: HashSet<PathBuf>,
}

impl ScanRules {
    pub fn from_config(config: &IndexConfig, permanently_sorted: HashSet<PathBuf>) -> Self {
        Self {
            root: config.storage_root.clone(),
            staging_name: config.staging_dir_name.clone(),
            protected: config.resolve(&config.protected_subtree),
            permanently_sorted,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `dir` (below the root) must not be visited.
    pub fn skips(&self, dir: &Path) -> bool {
        let name = display_name(dir);
        name.starts_with('.')
            || name == self.staging_name
            || dir.starts_with(&self.protected)
            || self.permanently_sorted.contains(dir)
    }

    /// True when a walk from the root would reach `dir`.
    pub fn admits(&self, dir: &Path) -> bool {
        if !dir.starts_with(&self.root) {
            return false;
        }
        let mut current = dir;
        while current != self.root {
            if self.skips(current) {
                return false;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        true
    }
}

/// Item count and size of one folder's countable media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderStats {
    pub path: PathBuf,
    pub item_count: u64,
    pub total_size: u64,
}

/// Aggregates for a set of folders plus every file counted along the way
#[derive(Debug, Clone, Default)]
pub struct FolderListing {
    pub stats: Vec<FolderStats>,
    pub files: Vec<DiscoveredFile>,
}

/// Direct children of one directory, sorted by name
struct Children {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FilesystemScanner {
    rules: ScanRules,
}

impl FilesystemScanner {
    pub fn new(rules: ScanRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ScanRules {
        &self.rules
    }

    /// Every folder under the root holding at least one media file.
    pub fn media_folders(&self) -> HashSet<PathBuf> {
        let mut found = HashSet::new();
        let mut queue = VecDeque::from([self.rules.root.clone()]);

        while let Some(dir) = queue.pop_front() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!("Skipping {}: {}", dir.display(), err);
                    continue;
                }
            };

            let mut has_media = false;
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    let child = entry.path();
                    if !self.rules.skips(&child) {
                        queue.push_back(child);
                    }
                } else if !has_media && file_type.is_file() {
                    // One media file is enough; the remaining entries only matter for subdirectories
                    has_media = media_types::is_media(&entry.path());
                }
            }

            if has_media {
                found.insert(dir);
            }
        }

        found
    }

    /// Count and size media in each folder (non-recursive), leaving out `processed` paths.
    /// Folders that cannot be listed are omitted.
    pub fn folder_stats(&self, folders: &[PathBuf], processed: &HashSet<PathBuf>) -> FolderListing {
        let mut listing = FolderListing::default();
        for folder in folders {
            if let Some(stats) = aggregate(folder, processed, Some(&mut listing.files)) {
                listing.stats.push(stats);
            }
        }
        listing
    }

    /// Recompute one folder's aggregate without touching the rest of the tree.
    pub fn rescan_folder(&self, folder: &Path, processed: &HashSet<PathBuf>) -> Option<FolderStats> {
        aggregate(folder, processed, None)
    }

    /// Media files directly inside `folder`.
    pub fn list_media_files(&self, folder: &Path) -> Vec<PathBuf> {
        match read_children(folder) {
            Some(children) => children
                .files
                .into_iter()
                .filter(|path| media_types::is_media(path))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every visitable directory below the root that directly holds no media,
    /// sorted case-insensitively by name. Directories that cannot be listed are
    /// left out since their emptiness cannot be confirmed.
    pub fn empty_folders(&self) -> Vec<FolderRef> {
        let mut empty: Vec<FolderRef> = WalkDir::new(&self.rules.root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.file_type().is_dir() && !self.rules.skips(entry.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!("Skipping entry during empty-folder walk: {}", err);
                    None
                }
            })
            .filter(|entry| {
                read_children(entry.path())
                    .is_some_and(|children| !children.files.iter().any(|f| media_types::is_media(f)))
            })
            .map(|entry| FolderRef::new(entry.into_path()))
            .collect();

        sort_folder_refs(&mut empty);
        empty
    }

    /// Depth-first walk from the root. `visit` receives each directory's media
    /// files before any of its subdirectories are entered; returning
    /// `ControlFlow::Break` stops the walk.
    pub fn walk_depth_first<F>(&self, mut visit: F)
    where
        F: FnMut(&Path, Vec<PathBuf>) -> ControlFlow<()>,
    {
        let mut stack = vec![self.rules.root.clone()];

        while let Some(dir) = stack.pop() {
            let Some(children) = read_children(&dir) else {
                continue;
            };

            let media: Vec<PathBuf> = children
                .files
                .into_iter()
                .filter(|path| media_types::is_media(path))
                .collect();
            if !media.is_empty() && visit(&dir, media).is_break() {
                return;
            }

            // Reverse so the first subdirectory is popped next
            stack.extend(
                children
                    .dirs
                    .into_iter()
                    .rev()
                    .filter(|child| !self.rules.skips(child)),
            );
        }
    }
}

fn read_children(dir: &Path) -> Option<Children> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Skipping {}: {}", dir.display(), err);
            return None;
        }
    };

    let mut children = Children {
        files: Vec::new(),
        dirs: Vec::new(),
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            children.dirs.push(entry.path());
        } else if file_type.is_file() {
            children.files.push(entry.path());
        }
    }
    children.files.sort();
    children.dirs.sort();
    Some(children)
}

fn aggregate(
    folder: &Path,
    processed: &HashSet<PathBuf>,
    mut files_out: Option<&mut Vec<DiscoveredFile>>,
) -> Option<FolderStats> {
    let children = read_children(folder)?;
    let mut stats = FolderStats {
        path: folder.to_path_buf(),
        item_count: 0,
        total_size: 0,
    };

    for path in children.files {
        if !media_types::is_media(&path) || processed.contains(&path) {
            continue;
        }
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };
        stats.item_count += 1;
        stats.total_size += metadata.len();
        if let Some(files) = files_out.as_deref_mut() {
            files.push(DiscoveredFile {
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                size: metadata.len(),
                path,
            });
        }
    }

    Some(stats)
}
