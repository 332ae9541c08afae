// # Puzzle Store Trait
//
// Defines the interface for the durable record of fetched, solved and
// posted puzzles.
//
// ## Purpose
//
// The store is the single source of truth for idempotency decisions:
// - A level is recorded once, on first sighting, and never overwritten
// - A recorded solution survives re-fetches of the same level
// - A posted level is never submitted again
//
// Records are never deleted; the key set only grows.
//
// ## Implementations
//
// - File-based: JSON file, atomic rename on persist
// - Memory: tests and dry runs
//
// ## Usage
//
// ```rust,ignore
// use flipsync_core::PuzzleStore;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* PuzzleStore implementation */;
//
//     store.upsert_if_absent(10, "1001,1220").await?;
//     store.record_solution(10, "0110").await?;
//     store.persist().await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored state of one level
///
/// Serialized with the field names other tools already read
/// (`boardStr`, `solution`, `posted`); the bookkeeping fields are optional
/// so files written without them still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleRecord {
    /// Encoded board as fetched
    #[serde(rename = "boardStr")]
    pub board_state: String,

    /// Encoded solution; empty until solved
    #[serde(default)]
    pub solution: String,

    /// Whether a submission was accepted
    #[serde(default)]
    pub posted: bool,

    /// Submissions made with the current solution
    #[serde(default, skip_serializing_if = "is_zero")]
    pub submit_attempts: u32,

    /// When the level was first fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,

    /// When the solution was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solved_at: Option<DateTime<Utc>>,

    /// When the submission was accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl PuzzleRecord {
    /// Create a fresh, unsolved record
    ///
    /// # Visibility
    ///
    /// This is `pub(crate)` so records are only created through
    /// [`PuzzleStore::upsert_if_absent`].
    pub(crate) fn new(board_state: impl Into<String>) -> Self {
        Self {
            board_state: board_state.into(),
            solution: String::new(),
            posted: false,
            submit_attempts: 0,
            fetched_at: Some(Utc::now()),
            solved_at: None,
            posted_at: None,
        }
    }

    /// Whether a solution has been recorded
    pub fn is_solved(&self) -> bool {
        !self.solution.is_empty()
    }

    /// Whether the record is solved but not yet accepted by the service
    pub fn awaiting_submission(&self) -> bool {
        self.is_solved() && !self.posted
    }

    pub(crate) fn set_solution(&mut self, solution: impl Into<String>) {
        self.solution = solution.into();
        self.solved_at = Some(Utc::now());
        self.submit_attempts = 0;
    }

    pub(crate) fn set_posted(&mut self, accepted: bool) {
        self.submit_attempts = self.submit_attempts.saturating_add(1);
        // Once accepted, a level stays posted
        if accepted {
            self.posted = true;
            self.posted_at = Some(Utc::now());
        }
    }
}

/// Trait for puzzle store implementations
///
/// # Contract
///
/// - `upsert_if_absent` never touches an existing record
/// - `record_solution` and `mark_posted` fail with [`crate::Error::NotFound`]
///   for unknown levels
/// - Mutations are kept in memory until `persist()`; `persist()` writes
///   the whole mapping atomically
/// - No business logic: deciding what to fetch, solve or submit is owned by
///   `SyncEngine`
#[async_trait]
pub trait PuzzleStore: Send + Sync {
    /// Whether a record exists for `level`
    async fn has_record(&self, level: u32) -> Result<bool, crate::Error>;

    /// Get a copy of the record for `level`
    async fn get_record(&self, level: u32) -> Result<Option<PuzzleRecord>, crate::Error>;

    /// Insert an unsolved record unless one already exists
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: a new record was created
    /// - `Ok(false)`: a record already existed and was left untouched
    async fn upsert_if_absent(&self, level: u32, board_state: &str)
    -> Result<bool, crate::Error>;

    /// Set the solution of an existing record
    async fn record_solution(&self, level: u32, solution: &str) -> Result<(), crate::Error>;

    /// Record the outcome of a submission attempt
    async fn mark_posted(&self, level: u32, accepted: bool) -> Result<(), crate::Error>;

    /// All stored levels, ascending
    async fn levels(&self) -> Result<Vec<u32>, crate::Error>;

    /// Write all records to durable storage
    async fn persist(&self) -> Result<(), crate::Error>;

    /// Most recently solved level at or above `min_level` that is not posted
    ///
    /// Records without a `solvedAt` stamp rank as the oldest; ties go to the
    /// higher level.
    async fn pending_submission(
        &self,
        min_level: Option<u32>,
    ) -> Result<Option<(u32, PuzzleRecord)>, crate::Error> {
        let floor = min_level.unwrap_or(0);
        let mut newest: Option<(u32, PuzzleRecord)> = None;
        for level in self.levels().await? {
            if level < floor {
                continue;
            }
            let Some(record) = self.get_record(level).await? else {
                continue;
            };
            if !record.awaiting_submission() {
                continue;
            }
            // Levels ascend, so `>=` lets the higher level win a tie
            if newest
                .as_ref()
                .is_none_or(|(_, best)| record.solved_at >= best.solved_at)
            {
                newest = Some((level, record));
            }
        }
        Ok(newest)
    }
}
