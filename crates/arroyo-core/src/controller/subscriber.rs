//! Table state subscriber trait

use super::{StateChange, TableContext};

/// Trait for components that need to respond to table state changes
pub trait TableStateSubscriber: Send + Sync {
    /// Called after a state slice changed or a refresh was requested
    fn on_state_change(&self, change: StateChange, context: &TableContext);
}
