// # Memory Puzzle Store
//
// In-memory implementation of PuzzleStore.
//
// ## Purpose
//
// Nothing survives a restart. Useful for tests and for dry runs where the
// store file should stay untouched.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::puzzle_store::{PuzzleRecord, PuzzleStore};

/// In-memory puzzle store
///
/// Clones share the same records, so a test can hand one clone to the
/// engine and inspect another.
///
/// # Example
///
/// ```rust,no_run
/// use flipsync_core::state::MemoryStore;
/// use flipsync_core::traits::PuzzleStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///
///     assert!(store.upsert_if_absent(10, "1001,1220").await?);
///     assert!(!store.upsert_if_absent(10, "ignored").await?);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<BTreeMap<u32, PuzzleRecord>>>,
    persist_calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Number of times `persist()` was called
    pub fn persist_count(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PuzzleStore for MemoryStore {
    async fn has_record(&self, level: u32) -> Result<bool, Error> {
        Ok(self.inner.read().await.contains_key(&level))
    }

    async fn get_record(&self, level: u32) -> Result<Option<PuzzleRecord>, Error> {
        Ok(self.inner.read().await.get(&level).cloned())
    }

    async fn upsert_if_absent(&self, level: u32, board_state: &str) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&level) {
            return Ok(false);
        }
        guard.insert(level, PuzzleRecord::new(board_state));
        Ok(true)
    }

    async fn record_solution(&self, level: u32, solution: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let record = guard
            .get_mut(&level)
            .ok_or_else(|| Error::not_found(format!("level {}", level)))?;
        record.set_solution(solution);
        Ok(())
    }

    async fn mark_posted(&self, level: u32, accepted: bool) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let record = guard
            .get_mut(&level)
            .ok_or_else(|| Error::not_found(format!("level {}", level)))?;
        record.set_posted(accepted);
        Ok(())
    }

    async fn levels(&self) -> Result<Vec<u32>, Error> {
        Ok(self.inner.read().await.keys().copied().collect())
    }

    async fn persist(&self) -> Result<(), Error> {
        // Nothing to write; counted so tests can observe flushes
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
