// # Solver Trait
//
// Defines the interface to the (opaque) puzzle solver.
//
// The board state is handed over explicitly in a [`SolveRequest`]; solvers
// must not go looking for it in the store file.

use async_trait::async_trait;

/// Input for one solver run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveRequest {
    /// Level being solved
    pub level: u32,
    /// Board exactly as fetched from the service
    pub board_state: String,
}

impl SolveRequest {
    /// Create a solve request
    pub fn new(level: u32, board_state: impl Into<String>) -> Self {
        Self {
            level,
            board_state: board_state.into(),
        }
    }
}

/// Trait for solver implementations
///
/// # Contract
///
/// - Returns the candidate solution as a single token
/// - Crashes, timeouts and empty output are [`crate::Error::Solver`]
/// - No retries (owned by `SyncEngine`)
#[async_trait]
pub trait Solver: Send + Sync {
    /// Solve one board
    async fn solve(&self, request: &SolveRequest) -> Result<String, crate::Error>;

    /// Short name used in logs
    fn solver_name(&self) -> &str;
}
