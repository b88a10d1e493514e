//! Filesystem side of the index
//!
//! This module handles:
//! - Walking the storage tree and aggregating per-folder stats (filesystem.rs)
//! - The image/video extension allowlist (media_types.rs)
//! - System-folder tagging (system.rs)
//! - Probing files the platform catalog does not know yet (probe.rs)

pub mod filesystem;
pub mod media_types;
pub mod probe;
pub mod system;

pub use filesystem::{FilesystemScanner, FolderListing, FolderStats, ScanRules};
pub use probe::{MediaProbe, NoVideoProbe, VideoGeometry, VideoProbe};
pub use system::SystemFolders;
