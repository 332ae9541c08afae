// # File Puzzle Store
//
// File-based implementation of PuzzleStore.
//
// ## Purpose
//
// Keeps the record of fetched, solved and posted levels across restarts.
// The whole mapping lives in memory and is rewritten in full on `persist()`.
//
// ## Crash Safety
//
// - Atomic writes: new content goes to a temporary file, then is renamed
// - Backup: the previous file is copied to `<path>.backup` before each rename
// - Corruption detection: JSON validated on load; a corrupt file is a
//   startup error (no silent fallback) so the operator can repair it
//
// ## File Format
//
// ```json
// {
//   "10": {
//     "boardStr": "1001,1220",
//     "solution": "0110",
//     "posted": true,
//     "submitAttempts": 1,
//     "fetchedAt": "2025-01-09T12:00:00Z"
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::puzzle_store::{PuzzleRecord, PuzzleStore};

/// File-based puzzle store
///
/// # Example
///
/// ```rust,no_run
/// use flipsync_core::state::FileStore;
/// use flipsync_core::traits::PuzzleStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::open("puzzle.json").await?;
///
///     store.upsert_if_absent(10, "1001,1220").await?;
///     store.persist().await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    records: BTreeMap<u32, PuzzleRecord>,
    dirty: bool,
}

impl FileStore {
    /// Open a store file, creating parent directories if needed
    ///
    /// A missing file is an empty store. A file that does not parse is
    /// [`Error::StoreCorrupt`].
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let records = Self::load(&path).await?;
        tracing::debug!(
            "Opened puzzle store {} with {} record(s)",
            path.display(),
            records.len()
        );

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                records,
                dirty: false,
            })),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<BTreeMap<u32, PuzzleRecord>, Error> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Store file does not exist: {}", path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                return Err(Error::store(format!(
                    "Failed to read store file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            let backup = Self::backup_path(path);
            let hint = if backup.exists() {
                format!("{}. Last good copy: {}", e, backup.display())
            } else {
                e.to_string()
            };
            Error::store_corrupt(path, hint)
        })
    }

    async fn write_state(&self) -> Result<(), Error> {
        let mut state_guard = self.state.write().await;

        let json = serde_json::to_string_pretty(&state_guard.records)
            .map_err(|e| Error::store(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create store backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state_guard.dirty = false;
        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }

    fn backup_path(path: &Path) -> PathBuf {
        with_suffix(path, ".backup")
    }
}

/// `puzzle.json` -> `puzzle.json<suffix>`; never replaces an extension
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[async_trait]
impl PuzzleStore for FileStore {
    async fn has_record(&self, level: u32) -> Result<bool, Error> {
        Ok(self.state.read().await.records.contains_key(&level))
    }

    async fn get_record(&self, level: u32) -> Result<Option<PuzzleRecord>, Error> {
        Ok(self.state.read().await.records.get(&level).cloned())
    }

    async fn upsert_if_absent(&self, level: u32, board_state: &str) -> Result<bool, Error> {
        let mut state_guard = self.state.write().await;
        if state_guard.records.contains_key(&level) {
            return Ok(false);
        }
        state_guard
            .records
            .insert(level, PuzzleRecord::new(board_state));
        state_guard.dirty = true;
        Ok(true)
    }

    async fn record_solution(&self, level: u32, solution: &str) -> Result<(), Error> {
        let mut state_guard = self.state.write().await;
        let record = state_guard
            .records
            .get_mut(&level)
            .ok_or_else(|| Error::not_found(format!("level {}", level)))?;
        record.set_solution(solution);
        state_guard.dirty = true;
        Ok(())
    }

    async fn mark_posted(&self, level: u32, accepted: bool) -> Result<(), Error> {
        let mut state_guard = self.state.write().await;
        let record = state_guard
            .records
            .get_mut(&level)
            .ok_or_else(|| Error::not_found(format!("level {}", level)))?;
        record.set_posted(accepted);
        state_guard.dirty = true;
        Ok(())
    }

    async fn levels(&self) -> Result<Vec<u32>, Error> {
        Ok(self.state.read().await.records.keys().copied().collect())
    }

    async fn persist(&self) -> Result<(), Error> {
        let clean = !self.state.read().await.dirty;
        if clean && self.path.exists() {
            return Ok(());
        }
        self.write_state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("puzzle.json");

        let store = FileStore::open(&path).await.unwrap();

        assert!(store.levels().await.unwrap().is_empty());
        assert!(!path.exists(), "open must not create the file");
    }

    #[tokio::test]
    async fn persist_then_open_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("puzzle.json");

        let store = FileStore::open(&path).await.unwrap();
        store.upsert_if_absent(10, "1001,1220").await.unwrap();
        store.upsert_if_absent(12, "22,10").await.unwrap();
        store.record_solution(10, "0110").await.unwrap();
        store.mark_posted(10, true).await.unwrap();
        store.persist().await.unwrap();

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.levels().await.unwrap(), vec![10, 12]);
        for level in [10, 12] {
            assert_eq!(
                reopened.get_record(level).await.unwrap(),
                store.get_record(level).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn reads_files_written_by_other_tools() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("puzzle.json");
        fs::write(
            &path,
            r#"{
    "10": {"boardStr": "1001,1220", "solution": "", "posted": false},
    "11": {"boardStr": "111,101", "solution": "010000", "posted": false}
}"#,
        )
        .await
        .unwrap();

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.levels().await.unwrap(), vec![10, 11]);
        let record = store.get_record(11).await.unwrap().unwrap();
        assert_eq!(record.solution, "010000");
    }

    #[tokio::test]
    async fn corrupt_file_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("puzzle.json");
        fs::write(&path, b"corrupted json data").await.unwrap();

        let err = FileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, Error::StoreCorrupt { .. }), "got {:?}", err);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn corrupt_file_error_points_at_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("puzzle.json");

        let store = FileStore::open(&path).await.unwrap();
        store.upsert_if_absent(1, "10").await.unwrap();
        store.persist().await.unwrap();
        store.upsert_if_absent(2, "01").await.unwrap();
        store.persist().await.unwrap();

        let backup_path = FileStore::backup_path(&path);
        assert!(backup_path.exists(), "second persist should leave a backup");

        fs::write(&path, b"{ truncated").await.unwrap();
        let err = FileStore::open(&path).await.unwrap_err();
        assert!(err.to_string().contains("puzzle.json.backup"), "got {}", err);

        // The backup holds the state before the last write.
        let previous = FileStore::open(&backup_path).await.unwrap();
        assert_eq!(previous.levels().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn persist_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("puzzle.json");

        let store = FileStore::open(&path).await.unwrap();
        for level in 0..10 {
            store.upsert_if_absent(level, "1").await.unwrap();
            store.persist().await.unwrap();
        }

        assert!(!store.temp_path().exists());
        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.levels().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn sidecar_files_never_collide_with_the_store() {
        for name in ["puzzle.backup", "puzzle.tmp", "puzzle"] {
            let dir = tempdir().unwrap();
            let path = dir.path().join(name);
            let store = FileStore::open(&path).await.unwrap();
            assert_ne!(store.temp_path(), path);
            assert_ne!(FileStore::backup_path(&path), path);

            store.upsert_if_absent(1, "10").await.unwrap();
            store.persist().await.unwrap();
            store.upsert_if_absent(2, "01").await.unwrap();
            store.persist().await.unwrap();

            let reopened = FileStore::open(&path).await.unwrap();
            assert_eq!(reopened.levels().await.unwrap(), vec![1, 2], "store {}", name);
            assert!(dir.path().join(format!("{}.backup", name)).exists());
        }
    }

    #[tokio::test]
    async fn record_solution_requires_prior_fetch() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("puzzle.json"))
            .await
            .unwrap();

        let err = store.record_solution(7, "0101").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = store.mark_posted(7, true).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
