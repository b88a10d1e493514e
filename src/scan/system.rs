//! System-folder classification
//!
//! A folder is "system" when it is one of the standard public directories or a
//! direct child of one with a conventional name (camera, screenshots, ...).
//! "Primary system" is a narrower set used only as a sort tie-break downstream.

use std::path::{Path, PathBuf};

use crate::config::IndexConfig;
use crate::scan::filesystem::FolderStats;
use crate::state::data::{display_name, FolderDetails};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFolders {
    roots: Vec<PathBuf>,
    child_names: Vec<String>,
    primary: Vec<PathBuf>,
}

impl SystemFolders {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            roots: config.system_roots.iter().map(|r| config.resolve(r)).collect(),
            child_names: config
                .system_child_names
                .iter()
                .map(|name| name.to_lowercase())
                .collect(),
            primary: config
                .primary_system_folders
                .iter()
                .map(|p| config.resolve(p))
                .collect(),
        }
    }

    pub fn is_system(&self, path: &Path) -> bool {
        if self.roots.iter().any(|root| root == path) {
            return true;
        }
        let Some(parent) = path.parent() else {
            return false;
        };
        if !self.roots.iter().any(|root| root == parent) {
            return false;
        }
        let name = display_name(path).to_lowercase();
        self.child_names.iter().any(|candidate| *candidate == name)
    }

    pub fn is_primary_system(&self, path: &Path) -> bool {
        self.primary.iter().any(|primary| primary == path)
    }

    /// Turn scanned aggregates into tagged folder details.
    pub fn tag(&self, stats: FolderStats) -> FolderDetails {
        FolderDetails {
            name: display_name(&stats.path),
            is_system: self.is_system(&stats.path),
            is_primary_system: self.is_primary_system(&stats.path),
            item_count: stats.item_count,
            total_size: stats.total_size,
            path: stats.path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folders() -> SystemFolders {
        SystemFolders::from_config(&IndexConfig::for_root("/storage/emulated/0"))
    }

    #[test]
    fn test_standard_roots_are_system() {
        let system = folders();
        assert!(system.is_system(Path::new("/storage/emulated/0/DCIM")));
        assert!(system.is_system(Path::new("/storage/emulated/0/Download")));
        assert!(!system.is_system(Path::new("/storage/emulated/0/Holiday")));
    }

    #[test]
    fn test_conventional_children_are_system() {
        let system = folders();
        assert!(system.is_system(Path::new("/storage/emulated/0/DCIM/Camera")));
        assert!(system.is_system(Path::new("/storage/emulated/0/Pictures/SCREENSHOTS")));
        assert!(!system.is_system(Path::new("/storage/emulated/0/DCIM/Trip")));
        assert!(!system.is_system(Path::new("/storage/emulated/0/DCIM/Camera/Burst")));
        assert!(!system.is_system(Path::new("/storage/emulated/0/Holiday/Camera")));
    }

    #[test]
    fn test_primary_is_narrower() {
        let system = folders();
        assert!(system.is_primary_system(Path::new("/storage/emulated/0/DCIM/Camera")));
        assert!(system.is_primary_system(Path::new("/storage/emulated/0/Movies")));
        assert!(!system.is_primary_system(Path::new("/storage/emulated/0/Documents")));
        assert!(!system.is_primary_system(Path::new("/storage/emulated/0/Pictures/Restored")));
    }
}
