use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::RwLock;

/// Stable identity of a displayed row
///
/// Rows with a source-provided key keep their expansion across refreshes
/// and re-sorts; rows without one are keyed by their absolute offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Source(i64),
    Offset(usize),
}

/// Which rows of a table are currently expanded
#[derive(Clone, Default)]
pub struct ExpansionState {
    expanded: Arc<RwLock<AHashSet<RowKey>>>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, key: &RowKey) -> bool {
        self.expanded.read().contains(key)
    }

    pub fn expand(&self, key: RowKey) {
        self.expanded.write().insert(key);
    }

    pub fn collapse(&self, key: &RowKey) {
        self.expanded.write().remove(key);
    }

    /// Flip a row; returns whether it is now expanded
    pub fn toggle(&self, key: RowKey) -> bool {
        let mut expanded = self.expanded.write();
        if expanded.remove(&key) {
            false
        } else {
            expanded.insert(key);
            true
        }
    }

    /// Forget every row not in `visible`
    pub fn retain_visible<'a>(&self, visible: impl IntoIterator<Item = &'a RowKey>) {
        let visible: AHashSet<&RowKey> = visible.into_iter().collect();
        self.expanded.write().retain(|key| visible.contains(key));
    }

    pub fn clear(&self) {
        self.expanded.write().clear();
    }

    pub fn len(&self) -> usize {
        self.expanded.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.read().is_empty()
    }
}
