// # flipsync-core
//
// Core library for the flipsync puzzle synchronization loop.
//
// ## Architecture Overview
//
// - **PuzzleService**: Trait for fetching the current puzzle and submitting answers
// - **PuzzleStore**: Trait for the durable level → record mapping (idempotency)
// - **Solver**: Trait for turning a board into a solution
// - **SyncEngine**: Orchestrates fetch → record → solve → submit, one puzzle at a time
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from the HTTP client and the solver process
// 2. **Store as Source of Truth**: What was fetched, solved and posted is decided by the store
// 3. **Sequential**: One iteration at a time; retries and backoff live in the engine only
// 4. **Library-First**: The daemon is a thin wrapper around this crate

pub mod config;
pub mod engine;
pub mod error;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{Credentials, EngineConfig, ServiceConfig, SolverConfig, StoreConfig, SyncConfig};
pub use engine::{EngineEvent, IterationOutcome, RunSummary, SessionCursor, StopReason, SyncEngine};
pub use error::{Error, Result};
pub use state::{FileStore, MemoryStore, open_store};
pub use traits::{PuzzleRecord, PuzzleService, PuzzleStore, Solver};
