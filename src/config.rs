//! Engine configuration
//!
//! All tunables live in one serde struct so a host can ship them as a JSON file.
//! Relative paths (protected subtree, system folders) are resolved against
//! `storage_root`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Root of the media storage tree (the device's shared storage)
    pub storage_root: PathBuf,
    /// Where the durable folder cache lives
    pub database_path: PathBuf,
    /// Directory name the app uses for files waiting to be sorted; never indexed
    pub staging_dir_name: String,
    /// OS-owned subtree under the root that must not be walked
    pub protected_subtree: PathBuf,
    /// Standard public directories, relative to the root
    pub system_roots: Vec<String>,
    /// Conventional child names (case-insensitive) that make a child of a system root "system"
    pub system_child_names: Vec<String>,
    /// Canonical folders flagged as primary system folders, relative to the root
    pub primary_system_folders: Vec<String>,
    /// Size of the first streamed batch
    pub first_batch_size: usize,
    /// Size of every batch after the first
    pub batch_size: usize,
    /// Capacity of the folder update event channel
    pub event_queue_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            database_path: default_database_path(),
            staging_dir_name: "SortStaging".to_string(),
            protected_subtree: PathBuf::from("Android"),
            system_roots: ["DCIM", "Pictures", "Movies", "Download", "Documents"]
                .map(String::from)
                .to_vec(),
            system_child_names: ["camera", "screenshots", "restored"]
                .map(String::from)
                .to_vec(),
            primary_system_folders: [
                "DCIM",
                "Pictures",
                "Movies",
                "Download",
                "DCIM/Camera",
                "Pictures/Screenshots",
            ]
            .map(String::from)
            .to_vec(),
            first_batch_size: 5,
            batch_size: 20,
            event_queue_capacity: 256,
        }
    }
}

impl IndexConfig {
    /// Configuration rooted at `storage_root`, everything else defaulted.
    pub fn for_root(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_batch_size == 0 || self.batch_size == 0 {
            return Err(IndexError::Config("batch sizes must be positive".into()));
        }
        if self.event_queue_capacity == 0 {
            return Err(IndexError::Config(
                "event_queue_capacity must be positive".into(),
            ));
        }
        if self.protected_subtree.is_absolute() {
            return Err(IndexError::Config(
                "protected_subtree must be relative to storage_root".into(),
            ));
        }
        Ok(())
    }

    /// Absolute path of a root-relative entry.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.storage_root.join(relative)
    }
}

/// Get the path where the database should be stored
/// - Linux: ~/.local/share/folder-index/folders.db
/// - macOS: ~/Library/Application Support/folder-index/folders.db
/// - Windows: %APPDATA%\folder-index\folders.db
fn default_database_path() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir);
    path.push("folder-index");
    path.push("folders.db");
    path
}

fn default_storage_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}
