/// State management module
///
/// This module handles all cached state, including:
/// - The shared data model (data.rs)
/// - The durable SQLite folder table (store.rs)
/// - Process-lifetime caches (session.rs)
/// - User preference sets read by the scanner (prefs.rs)
pub mod data;
pub mod prefs;
pub mod session;
pub mod store;

pub use data::{FolderDetails, FolderRef, FolderUpdateEvent, MediaItem};
pub use prefs::{StaticPreferences, UserPreferences};
pub use session::{FolderSnapshot, SessionCache};
pub use store::FolderCacheStore;
