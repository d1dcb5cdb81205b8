//! Data access for the conjunction tables: result caching, fetch
//! orchestration and concrete conjunction sources

pub mod cache;
pub mod config;
pub mod fetch;
pub mod sources;

use arroyo_core::SourceError;
use thiserror::Error;
use tokio::task::JoinError;

// Re-exports
pub use cache::{CacheEntry, ResultCache};
pub use config::{FetchConfig, SourceConfig};
pub use fetch::{FetchOrchestrator, PageState};
pub use sources::{HttpSource, SqliteSource};

/// Errors that can occur in data operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("Join error: {0}")]
    Join(#[from] JoinError),
}

impl From<DataError> for SourceError {
    fn from(error: DataError) -> Self {
        match error {
            DataError::Http(e) => SourceError::Transport(e.to_string()),
            other => SourceError::Query(other.to_string()),
        }
    }
}
