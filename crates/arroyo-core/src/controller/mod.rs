use thiserror::Error;

use crate::query::QueryDescriptor;
use crate::state::TableState;
use crate::variant::Predicate;

mod engine;
mod subscriber;

pub use engine::TableStateController;
pub use subscriber::TableStateSubscriber;

/// Which part of the table state a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Filters,
    Predicates,
    Sort,
    Pagination,
    Search,
    /// Explicit refresh; no state slice changed
    Refresh,
}

/// Snapshot passed to subscribers on every change
#[derive(Debug, Clone)]
pub struct TableContext {
    pub state: TableState,
    pub descriptor: QueryDescriptor,
    /// Incremented by every explicit refresh request
    pub refresh_generation: u64,
}

/// Rejected table state mutations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{0}' cannot be sorted")]
    NotSortable(String),

    #[error("column '{0}' cannot be filtered")]
    NotFilterable(String),

    #[error("column '{0}' appears more than once")]
    DuplicateColumn(String),

    #[error("predicate '{predicate}' is not available for column '{column}'")]
    PredicateNotAllowed { column: String, predicate: Predicate },

    #[error("filter value for column '{column}' does not match predicate '{predicate}'")]
    OperandMismatch { column: String, predicate: Predicate },

    #[error("page size must be between 1 and {max}, got {requested}")]
    InvalidPageSize { requested: usize, max: usize },

    #[error("already at first page")]
    AtFirstPage,

    #[error("already at last page")]
    AtLastPage,
}
