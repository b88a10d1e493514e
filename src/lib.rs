//! Folder indexing and caching engine for on-device photo and video libraries.
//!
//! Three sources of truth are reconciled here: the raw filesystem, the
//! platform media catalog (which lags behind real file changes) and a durable
//! SQLite folder cache that the rest of an application reads from.

pub mod config;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod index;
pub mod platform;
pub mod scan;
pub mod state;
pub mod sync;

pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use fetch::StreamingMediaFetcher;
pub use index::{FolderIndex, Invalidation};
pub use platform::{MediaCatalog, PlatformIndexBridge};
pub use state::data::{FolderDelta, FolderDetails, FolderRef, FolderUpdateEvent, MediaItem};
