use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use super::data::{sort_folders, FolderDetails, FolderRecord};
use crate::error::Result;

/// Maximum number of paths bound into one `IN (...)` clause
const MAX_BATCH_SIZE: usize = 100;

const SELECT_COLUMNS: &str =
    "SELECT path, name, item_count, total_size, is_system, is_primary_system FROM folders";

const UPSERT_SQL: &str = "INSERT INTO folders (path, name, item_count, total_size, is_system, is_primary_system)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(path) DO UPDATE SET
        name = excluded.name,
        item_count = excluded.item_count,
        total_size = excluded.total_size,
        is_system = excluded.is_system,
        is_primary_system = excluded.is_primary_system";

/// The FolderCacheStore is the durable tier: a SQLite table of folder
/// aggregates keyed by path.
///
/// Every committed write republishes the full table on a watch channel, so any
/// number of subscribers can observe it. Multi-row writes run in a single
/// transaction: either every row lands or none does.
pub struct FolderCacheStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    changes: watch::Sender<Vec<FolderDetails>>,
    /// Bumped each time the table becomes empty through a clear or delete
    empty_epoch: AtomicU64,
}

impl FolderCacheStore {
    /// Open or create the database at `db_path`, creating parent directories as needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        info!("Folder cache initialized at: {}", db_path.display());
        Self::with_connection(conn, Some(db_path.to_path_buf()))
    }

    /// A store that lives only as long as the process.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        init_schema(&conn)?;
        let initial = query_all(&conn)?;
        let (changes, _) = watch::channel(initial);
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            changes,
            empty_epoch: AtomicU64::new(0),
        })
    }

    /// Run `op` against the store on the blocking pool, off the async workers.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, op: F) -> Result<T>
    where
        F: FnOnce(&FolderCacheStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Receiver holding the latest committed table contents.
    pub fn subscribe(&self) -> watch::Receiver<Vec<FolderDetails>> {
        self.changes.subscribe()
    }

    /// Stream of the whole table: the current contents, then once per committed write.
    pub fn all(&self) -> WatchStream<Vec<FolderDetails>> {
        WatchStream::new(self.subscribe())
    }

    /// Current contents, sorted case-insensitively by name.
    pub fn snapshot(&self) -> Result<Vec<FolderDetails>> {
        query_all(&self.conn.lock())
    }

    pub fn paths(&self) -> Result<HashSet<PathBuf>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path FROM folders")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM folders", [], |row| row.get(0))?;
        Ok(count == 0)
    }

    pub fn get(&self, path: &Path) -> Result<Option<FolderDetails>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE path = ?1"),
                params![path.to_string_lossy().into_owned()],
                read_record,
            )
            .optional()?;
        Ok(record.map(FolderDetails::from))
    }

    /// Insert or replace one folder by path.
    pub fn upsert(&self, folder: &FolderDetails) -> Result<()> {
        self.upsert_all(std::slice::from_ref(folder))
    }

    /// Insert or replace many folders in one transaction.
    pub fn upsert_all(&self, folders: &[FolderDetails]) -> Result<()> {
        if folders.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for folder in folders {
                let record = FolderRecord::from(folder);
                stmt.execute(params![
                    record.path,
                    record.name,
                    record.item_count,
                    record.total_size,
                    record.is_system,
                    record.is_primary_system,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} folders", folders.len());

        self.publish(&conn)
    }

    /// Delete the given folders in one transaction. Returns how many rows went away.
    pub fn delete_by_paths(&self, paths: &[PathBuf]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = paths
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for chunk in keys.chunks(MAX_BATCH_SIZE) {
            let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!("DELETE FROM folders WHERE path IN ({})", placeholders.join(", "));
            deleted += tx.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        tx.commit()?;

        if deleted > 0 {
            debug!("Deleted {} folders", deleted);
            let remaining: i64 = conn.query_row("SELECT COUNT(*) FROM folders", [], |row| row.get(0))?;
            if remaining == 0 {
                self.empty_epoch.fetch_add(1, Ordering::SeqCst);
            }
            self.publish(&conn)?;
        }
        Ok(deleted)
    }

    /// Remove every folder.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM folders", [])?;
        self.empty_epoch.fetch_add(1, Ordering::SeqCst);
        info!("Cleared folder cache ({} rows)", removed);
        self.publish(&conn)
    }

    /// Generation counter for "table became empty". The start gate keys on it so
    /// an emptied cache can trigger a fresh full scan.
    pub fn empty_epoch(&self) -> u64 {
        self.empty_epoch.load(Ordering::SeqCst)
    }

    fn publish(&self, conn: &Connection) -> Result<()> {
        let rows = query_all(conn)?;
        self.changes.send_replace(rows);
        Ok(())
    }
}

impl fmt::Debug for FolderCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderCacheStore")
            .field("db_path", &self.db_path)
            .field("empty_epoch", &self.empty_epoch())
            .finish()
    }
}

/// Creates the folders table if it doesn't exist.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS folders (
            path                TEXT PRIMARY KEY NOT NULL,
            name                TEXT NOT NULL,
            item_count          INTEGER NOT NULL,
            total_size          INTEGER NOT NULL,
            is_system           INTEGER NOT NULL DEFAULT 0,
            is_primary_system   INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    Ok(())
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<FolderRecord> {
    Ok(FolderRecord {
        path: row.get(0)?,
        name: row.get(1)?,
        item_count: row.get(2)?,
        total_size: row.get(3)?,
        is_system: row.get(4)?,
        is_primary_system: row.get(5)?,
    })
}

fn query_all(conn: &Connection) -> Result<Vec<FolderDetails>> {
    let mut stmt = conn.prepare_cached(SELECT_COLUMNS)?;
    let records = stmt
        .query_map([], read_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut folders: Vec<FolderDetails> = records.into_iter().map(FolderDetails::from).collect();
    sort_folders(&mut folders);
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(path: &str, count: u64) -> FolderDetails {
        FolderDetails {
            path: PathBuf::from(path),
            name: Path::new(path).file_name().unwrap().to_string_lossy().into_owned(),
            item_count: count,
            total_size: count * 1_000,
            is_system: false,
            is_primary_system: false,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = FolderCacheStore::open_in_memory().unwrap();
        store.upsert(&folder("/storage/Trip", 3)).unwrap();

        let fetched = store.get(Path::new("/storage/Trip")).unwrap();
        assert_eq!(fetched, Some(folder("/storage/Trip", 3)));
        assert_eq!(store.get(Path::new("/storage/Other")).unwrap(), None);
    }

    #[test]
    fn test_upsert_replaces_by_path() {
        let store = FolderCacheStore::open_in_memory().unwrap();
        store.upsert(&folder("/storage/Trip", 3)).unwrap();
        store.upsert(&folder("/storage/Trip", 7)).unwrap();

        let all = store.snapshot().unwrap();
        assert_eq!(all, vec![folder("/storage/Trip", 7)]);
    }

    #[test]
    fn test_delete_more_paths_than_one_batch() {
        let store = FolderCacheStore::open_in_memory().unwrap();
        let folders: Vec<_> = (0..250).map(|i| folder(&format!("/storage/f{i}"), 1)).collect();
        store.upsert_all(&folders).unwrap();

        let mut doomed: Vec<PathBuf> = folders[..240].iter().map(|f| f.path.clone()).collect();
        doomed.push(PathBuf::from("/storage/never-existed"));
        let deleted = store.delete_by_paths(&doomed).unwrap();

        assert_eq!(deleted, 240);
        assert_eq!(store.snapshot().unwrap().len(), 10);
        assert_eq!(store.empty_epoch(), 0);
    }

    #[test]
    fn test_emptying_bumps_epoch() {
        let store = FolderCacheStore::open_in_memory().unwrap();
        store.upsert(&folder("/storage/Trip", 1)).unwrap();
        store.delete_by_paths(&[PathBuf::from("/storage/Trip")]).unwrap();
        assert_eq!(store.empty_epoch(), 1);

        store.clear().unwrap();
        assert_eq!(store.empty_epoch(), 2);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_writes_are_published() {
        let store = FolderCacheStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        store.upsert_all(&[folder("/storage/b", 1), folder("/storage/A", 2)]).unwrap();
        assert!(rx.has_changed().unwrap());
        let names: Vec<_> = rx.borrow_and_update().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, ["A", "b"]);

        store.delete_by_paths(&[PathBuf::from("/storage/zzz")]).unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_all_streams_current_then_changes() {
        use futures::StreamExt;

        let store = FolderCacheStore::open_in_memory().unwrap();
        let mut all = store.all();
        assert!(all.next().await.unwrap().is_empty());

        store.upsert(&folder("/storage/Trip", 1)).unwrap();
        assert_eq!(all.next().await.unwrap(), vec![folder("/storage/Trip", 1)]);
    }

    #[tokio::test]
    async fn test_run_blocking_returns_result() {
        let store = Arc::new(FolderCacheStore::open_in_memory().unwrap());
        let written = store
            .run_blocking(|store| {
                store.upsert(&folder("/storage/Trip", 2))?;
                store.snapshot()
            })
            .await
            .unwrap();
        assert_eq!(written, vec![folder("/storage/Trip", 2)]);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested/folders.db");
        {
            let store = FolderCacheStore::open(&db_path).unwrap();
            store.upsert(&folder("/storage/Trip", 4)).unwrap();
        }
        let store = FolderCacheStore::open(&db_path).unwrap();
        assert_eq!(store.path(), Some(db_path.as_path()));
        assert_eq!(store.snapshot().unwrap(), vec![folder("/storage/Trip", 4)]);
    }
}
