//! Core table state for the conjunction tables
//!
//! This crate owns the user-driven table state, turns it into canonical
//! query descriptors, and defines the paged query contract that data
//! sources implement.

pub mod controller;
pub mod data;
pub mod events;
pub mod expansion;
pub mod query;
pub mod state;
pub mod variant;

// Re-export commonly used types
pub use controller::{StateChange, StateError, TableContext, TableStateController, TableStateSubscriber};
pub use data::{ConjunctionSource, DatasetSummary, RawRow, ResponsePage, SourceError};
pub use events::EventBus;
pub use expansion::{ExpansionState, RowKey};
pub use query::{QueryDescriptor, QueryRequest};
pub use state::{FilterValue, Pagination, SortKey, TableState};
pub use variant::{ColumnId, ColumnKind, ColumnSpec, FilterSpec, Predicate, SeverityScale, TableVariant, VariantConfig};

/// Identifier of a table view instance
pub type TableViewId = uuid::Uuid;
