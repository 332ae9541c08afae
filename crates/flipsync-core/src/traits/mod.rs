//! Core traits for the flipsync system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`PuzzleService`]: Fetch puzzles from and submit solutions to the game
//! - [`PuzzleStore`]: Durable record of fetched/solved/posted levels
//! - [`Solver`]: Turn a board into a solution

pub mod puzzle_service;
pub mod puzzle_store;
pub mod solver;

pub use puzzle_service::{FetchOutcome, FetchedPuzzle, MissingField, PuzzleService, SubmitOutcome};
pub use puzzle_store::{PuzzleRecord, PuzzleStore};
pub use solver::{SolveRequest, Solver};
