//! User preference sets consumed by the index
//!
//! The index only reads these. Persisting them is the host application's job;
//! `StaticPreferences` covers the CLI and tests.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub trait UserPreferences: Send + Sync {
    /// Folders the user finished sorting; the scanner never enters them
    fn permanently_sorted_paths(&self) -> HashSet<PathBuf>;

    /// Files hidden from folder counts without being deleted
    fn processed_paths(&self) -> HashSet<PathBuf>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct PreferenceSets {
    permanently_sorted: HashSet<PathBuf>,
    processed: HashSet<PathBuf>,
}

/// Fixed, lock-protected preference sets
#[derive(Debug, Default)]
pub struct StaticPreferences {
    sets: RwLock<PreferenceSets>,
}

impl StaticPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file of the form
    /// `{"permanently_sorted": [...], "processed": [...]}`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let sets: PreferenceSets = serde_json::from_str(&contents)?;
        Ok(Self {
            sets: RwLock::new(sets),
        })
    }

    pub fn set_permanently_sorted(&self, paths: impl IntoIterator<Item = PathBuf>) {
        self.sets.write().permanently_sorted = paths.into_iter().collect();
    }

    pub fn set_processed(&self, paths: impl IntoIterator<Item = PathBuf>) {
        self.sets.write().processed = paths.into_iter().collect();
    }
}

impl UserPreferences for StaticPreferences {
    fn permanently_sorted_paths(&self) -> HashSet<PathBuf> {
        self.sets.read().permanently_sorted.clone()
    }

    fn processed_paths(&self) -> HashSet<PathBuf> {
        self.sets.read().processed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, r#"{"processed": ["/storage/DCIM/a.jpg"]}"#).unwrap();

        let prefs = StaticPreferences::load(&path).unwrap();

        assert!(prefs.permanently_sorted_paths().is_empty());
        assert!(prefs.processed_paths().contains(Path::new("/storage/DCIM/a.jpg")));
    }

    #[test]
    fn test_setters_replace_sets() {
        let prefs = StaticPreferences::new();
        prefs.set_permanently_sorted([PathBuf::from("/a"), PathBuf::from("/b")]);
        prefs.set_permanently_sorted([PathBuf::from("/c")]);
        assert_eq!(prefs.permanently_sorted_paths().len(), 1);
    }
}
