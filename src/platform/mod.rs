//! Platform media catalog
//!
//! The platform index is an eventually-consistent service owned by the OS. This
//! module holds:
//! - The provider interface the engine talks to (`MediaCatalog`)
//! - The bridge that batches queries and degrades failures (bridge.rs)
//! - A deterministic in-memory catalog (memory.rs)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod bridge;
pub mod memory;

pub use bridge::PlatformIndexBridge;
pub use memory::InMemoryCatalog;

/// Metadata the catalog already holds for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRecord {
    pub path: PathBuf,
    pub uri: String,
    pub display_name: String,
    pub mime_type: String,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub size: u64,
    /// Bucket key of the owning folder
    pub bucket_id: i32,
    pub bucket_name: String,
    pub is_video: bool,
    /// Stored (unrotated) width
    pub width: u32,
    /// Stored (unrotated) height
    pub height: u32,
    /// Rotation in degrees
    pub orientation: i32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Catalog query failed: {0}")]
    Query(String),

    #[error("Scan request failed: {0}")]
    ScanRequest(String),
}

/// Invoked once per path when the catalog finishes (re)scanning it
pub type ScanCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// Provider interface over the platform media catalog.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// Image and video records, restricted to the given folder buckets when `buckets` is set.
    async fn query(&self, buckets: Option<&HashSet<i32>>) -> Result<Vec<IndexedRecord>, CatalogError>;

    /// Every path the catalog currently knows about, unfiltered.
    async fn known_paths(&self) -> Result<Vec<PathBuf>, CatalogError>;

    /// Ask the catalog to (re)scan `paths`. `on_scanned` fires once per path as each
    /// completes. The request cannot be retracted once issued.
    fn request_scan(&self, paths: Vec<PathBuf>, on_scanned: ScanCallback) -> Result<(), CatalogError>;
}

/// Bucket key for a folder: 32-bit string hash over the UTF-16 units of the
/// lowercased absolute path. Opaque; equal only for the same folder, so bucket
/// filtering never reaches into subfolders.
pub fn bucket_key(folder: &Path) -> i32 {
    folder
        .to_string_lossy()
        .to_lowercase()
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_mul(31).wrapping_add(i32::from(unit))
        })
}
