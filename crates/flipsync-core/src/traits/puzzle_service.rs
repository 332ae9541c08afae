// # Puzzle Service Trait
//
// Defines the interface to the remote puzzle game.
//
// ## Implementations
//
// - hacker.org "cross": `flipsync-service-hackerorg` crate
//
// ## Usage
//
// ```rust,ignore
// use flipsync_core::traits::{FetchOutcome, PuzzleService};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let service = /* PuzzleService implementation */;
//
//     if let FetchOutcome::Puzzle(puzzle) = service.fetch_current_puzzle().await? {
//         service.submit_solution(puzzle.level, "0110").await?;
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::fmt;

/// A puzzle as currently shown by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPuzzle {
    /// Server-assigned level number
    pub level: u32,
    /// Opaque encoded board
    pub board_state: String,
}

impl FetchedPuzzle {
    /// Create a fetched puzzle
    pub fn new(level: u32, board_state: impl Into<String>) -> Self {
        Self {
            level,
            board_state: board_state.into(),
        }
    }
}

/// Why a fetched page did not yield a puzzle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    /// No initialization script at all (login page, error page)
    Fragment,
    /// Script present but the board token is missing
    BoardState,
    /// Script present but the level number is missing or not numeric
    Level,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingField::Fragment => write!(f, "no board initialization script in page"),
            MissingField::BoardState => write!(f, "board initialization script has no board"),
            MissingField::Level => write!(f, "board initialization script has no level"),
        }
    }
}

/// Result of fetching the current puzzle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page carried a puzzle
    Puzzle(FetchedPuzzle),
    /// The page did not carry a puzzle
    NotFound(MissingField),
}

/// Result of submitting a solution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The service acknowledged the solution
    Accepted,
    /// The response lacked the success marker
    Rejected,
}

impl SubmitOutcome {
    /// Whether the solution was accepted
    pub fn is_accepted(self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// Trait for remote puzzle service implementations
///
/// # Contract
///
/// - One HTTP exchange per call; no retries, no backoff (owned by `SyncEngine`)
/// - No access to the puzzle store
/// - Transport failures are returned as [`crate::Error::Transport`];
///   a page that merely lacks the puzzle is `Ok(FetchOutcome::NotFound(_))`
/// - Credentials must never appear in logs, errors or URLs
#[async_trait]
pub trait PuzzleService: Send + Sync {
    /// Fetch the puzzle the service currently shows for this account
    ///
    /// This is not parameterized by level: the service decides which puzzle
    /// is current.
    async fn fetch_current_puzzle(&self) -> Result<FetchOutcome, crate::Error>;

    /// Submit a solution for a level
    ///
    /// # Returns
    ///
    /// - `Ok(SubmitOutcome::Accepted)`: success marker present
    /// - `Ok(SubmitOutcome::Rejected)`: any other response
    /// - `Err(Error)`: the request itself failed
    async fn submit_solution(
        &self,
        level: u32,
        solution: &str,
    ) -> Result<SubmitOutcome, crate::Error>;

    /// Short name used in logs
    fn service_name(&self) -> &'static str;
}
