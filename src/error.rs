use std::path::PathBuf;

/// Errors surfaced by the folder index.
///
/// Filesystem and catalog failures are absorbed where they happen (the offending
/// directory or query is skipped); what reaches a caller is mostly durable-store
/// trouble, which has no local recovery.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Path is outside the storage root: {0}")]
    OutsideRoot(PathBuf),
}

pub type Result<T> = std::result::Result<T, IndexError>;
