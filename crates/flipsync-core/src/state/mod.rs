// # Puzzle Store Implementations
//
// This module provides implementations of the PuzzleStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::traits::PuzzleStore;

/// Open the store described by `config`
pub async fn open_store(config: &StoreConfig) -> Result<Box<dyn PuzzleStore>> {
    match config {
        StoreConfig::File { path } => Ok(Box::new(FileStore::open(path).await?)),
        StoreConfig::Memory => Ok(Box::new(MemoryStore::new())),
    }
}
