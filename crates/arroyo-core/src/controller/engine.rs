//! Table state controller implementation

use super::{StateChange, StateError, TableContext, TableStateSubscriber};
use crate::query::QueryDescriptor;
use crate::state::{FilterValue, SortKey, TableState};
use crate::variant::{ColumnId, FilterSpec, Predicate, VariantConfig};
use ahash::AHashSet;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Controller state stored internally
#[derive(Debug, Clone)]
struct ControllerState {
    table: TableState,
    refresh_generation: u64,
    /// Total from the most recently applied page
    total_row_count: Option<u64>,
}

/// Sole writer of the table state that feeds query construction
pub struct TableStateController {
    config: Arc<VariantConfig>,
    state: Arc<RwLock<ControllerState>>,
    subscribers: Arc<RwLock<Vec<Weak<dyn TableStateSubscriber>>>>,
}

impl TableStateController {
    /// Create a controller in the variant's initial state
    pub fn new(config: VariantConfig) -> Self {
        let state = ControllerState {
            table: TableState::new(&config),
            refresh_generation: 0,
            total_row_count: None,
        };

        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &VariantConfig {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<VariantConfig> {
        self.config.clone()
    }

    /// Set or clear the filter of a single column
    pub fn set_filter(&self, column: &str, value: Option<FilterValue>) -> Result<(), StateError> {
        let spec = self.filter_spec(column)?;
        self.mutate(StateChange::Filters, |table| {
            match value {
                Some(value) => {
                    let predicate = table.filter_predicates.get(column).copied().unwrap_or(spec.default);
                    check_operand(column, predicate, &value)?;
                    table.filters.insert(ColumnId::from(column), value);
                }
                None => {
                    table.filters.remove(column);
                }
            }
            Ok(())
        })
    }

    /// Replace all active filters at once
    pub fn set_filters(&self, filters: Vec<(ColumnId, FilterValue)>) -> Result<(), StateError> {
        let mut seen = AHashSet::new();
        for (column, _) in &filters {
            self.filter_spec(column.as_str())?;
            if !seen.insert(column.clone()) {
                return Err(StateError::DuplicateColumn(column.to_string()));
            }
        }

        self.mutate(StateChange::Filters, |table| {
            for (column, value) in &filters {
                let predicate = table
                    .filter_predicates
                    .get(column.as_str())
                    .copied()
                    .ok_or_else(|| StateError::NotFilterable(column.to_string()))?;
                check_operand(column.as_str(), predicate, value)?;
            }
            table.filters = filters.into_iter().collect();
            Ok(())
        })
    }

    pub fn clear_filters(&self) {
        // Clearing never fails validation.
        let _ = self.mutate(StateChange::Filters, |table| {
            table.filters.clear();
            Ok(())
        });
    }

    /// Select the predicate of a filterable column
    ///
    /// An active filter on the same column whose operand no longer fits
    /// the predicate is dropped.
    pub fn set_predicate(&self, column: &str, predicate: Predicate) -> Result<(), StateError> {
        let spec = self.filter_spec(column)?;
        if !spec.allows(predicate) {
            return Err(StateError::PredicateNotAllowed {
                column: column.to_string(),
                predicate,
            });
        }

        self.mutate(StateChange::Predicates, |table| {
            table.filter_predicates.insert(ColumnId::from(column), predicate);
            if table.filters.get(column).is_some_and(|value| !value.fits(predicate)) {
                debug!("Dropping filter on '{}' after switching to '{}'", column, predicate);
                table.filters.remove(column);
            }
            Ok(())
        })
    }

    /// Replace the sort keys
    pub fn set_sort(&self, sort: Vec<SortKey>) -> Result<(), StateError> {
        let mut seen = AHashSet::new();
        for key in &sort {
            let column = self
                .config
                .column(key.column.as_str())
                .ok_or_else(|| StateError::UnknownColumn(key.column.to_string()))?;
            if !column.sortable {
                return Err(StateError::NotSortable(key.column.to_string()));
            }
            if !seen.insert(key.column.clone()) {
                return Err(StateError::DuplicateColumn(key.column.to_string()));
            }
        }

        self.mutate(StateChange::Sort, |table| {
            table.sort = sort;
            Ok(())
        })
    }

    /// Cycle a column through ascending, descending and unsorted
    pub fn toggle_sort(&self, column: &str) -> Result<(), StateError> {
        let current = self.state.read().table.sort.clone();
        let next = match current.as_slice() {
            [key] if key.column.as_str() == column && !key.descending => vec![SortKey::descending(column)],
            [key] if key.column.as_str() == column => Vec::new(),
            _ => vec![SortKey::ascending(column)],
        };
        self.set_sort(next)
    }

    /// Set the free-text search; blank input clears it
    pub fn set_global_search(&self, search: Option<String>) {
        let search = search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let _ = self.mutate(StateChange::Search, |table| {
            table.global_search = search;
            Ok(())
        });
    }

    /// Jump to a page; other state slices are left alone
    pub fn set_page_index(&self, page_index: usize) {
        let mut state = self.state.write();
        state.table.pagination.page_index = page_index;
        drop(state);
        self.notify_subscribers(StateChange::Pagination);
    }

    /// Change the page size, keeping the first visible row on screen
    pub fn set_page_size(&self, page_size: usize) -> Result<(), StateError> {
        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(StateError::InvalidPageSize {
                requested: page_size,
                max: self.config.max_page_size,
            });
        }

        let mut state = self.state.write();
        let first_row = state.table.pagination.offset();
        state.table.pagination.page_size = page_size;
        state.table.pagination.page_index = first_row / page_size;
        drop(state);
        self.notify_subscribers(StateChange::Pagination);
        Ok(())
    }

    /// Navigate forward by one page
    pub fn next_page(&self) -> Result<(), StateError> {
        let mut state = self.state.write();
        let pagination = state.table.pagination;

        if let Some(total) = state.total_row_count {
            if pagination.page_index + 1 >= pagination.page_count(total) {
                return Err(StateError::AtLastPage);
            }
        }
        state.table.pagination.page_index += 1;

        drop(state);
        self.notify_subscribers(StateChange::Pagination);
        Ok(())
    }

    /// Navigate backward by one page
    pub fn previous_page(&self) -> Result<(), StateError> {
        let mut state = self.state.write();
        if state.table.pagination.page_index == 0 {
            return Err(StateError::AtFirstPage);
        }
        state.table.pagination.page_index -= 1;

        drop(state);
        self.notify_subscribers(StateChange::Pagination);
        Ok(())
    }

    /// Signal an explicit refresh of the current page
    ///
    /// No state slice changes; subscribers are told to bypass freshness.
    pub fn request_refresh(&self) -> u64 {
        let mut state = self.state.write();
        state.refresh_generation += 1;
        let generation = state.refresh_generation;
        drop(state);

        debug!("Refresh requested (generation {})", generation);
        self.notify_subscribers(StateChange::Refresh);
        generation
    }

    /// Record the total of an applied page
    ///
    /// When the current page lies beyond the new total, the page index is
    /// clamped to the last page and `true` is returned.
    pub fn reconcile_total(&self, total_row_count: u64) -> bool {
        let mut state = self.state.write();
        state.total_row_count = Some(total_row_count);

        let pagination = state.table.pagination;
        let offset = u64::try_from(pagination.offset()).unwrap_or(u64::MAX);
        if pagination.page_index == 0 || offset < total_row_count {
            return false;
        }

        let last_page = pagination.page_count(total_row_count).saturating_sub(1);
        state.table.pagination.page_index = last_page;
        drop(state);

        debug!("Clamped page index to {} after total shrank to {}", last_page, total_row_count);
        self.notify_subscribers(StateChange::Pagination);
        true
    }

    /// Copy of the current table state
    pub fn snapshot(&self) -> TableState {
        self.state.read().table.clone()
    }

    /// Descriptor of the current table state
    pub fn descriptor(&self) -> QueryDescriptor {
        QueryDescriptor::build(&self.state.read().table)
    }

    pub fn refresh_generation(&self) -> u64 {
        self.state.read().refresh_generation
    }

    /// Number of pages for the last known total
    pub fn page_count(&self) -> Option<usize> {
        let state = self.state.read();
        state
            .total_row_count
            .map(|total| state.table.pagination.page_count(total))
    }

    /// Get current table context
    pub fn get_context(&self) -> TableContext {
        let state = self.state.read();
        TableContext {
            descriptor: QueryDescriptor::build(&state.table),
            state: state.table.clone(),
            refresh_generation: state.refresh_generation,
        }
    }

    /// Add a subscriber
    pub fn add_subscriber(&self, subscriber: Arc<dyn TableStateSubscriber>) {
        let mut subscribers = self.subscribers.write();
        subscribers.push(Arc::downgrade(&subscriber));
    }

    fn filter_spec(&self, column: &str) -> Result<FilterSpec, StateError> {
        let spec = self
            .config
            .column(column)
            .ok_or_else(|| StateError::UnknownColumn(column.to_string()))?;
        spec.filter
            .clone()
            .ok_or_else(|| StateError::NotFilterable(column.to_string()))
    }

    /// Apply a mutation of a non-pagination slice
    ///
    /// The mutation runs on a copy and is only stored if it succeeds;
    /// a stored mutation always returns to the first page.
    fn mutate<F>(&self, change: StateChange, apply: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut TableState) -> Result<(), StateError>,
    {
        let mut state = self.state.write();
        let mut table = state.table.clone();
        apply(&mut table)?;
        table.pagination.page_index = 0;
        state.table = table;
        drop(state);

        debug!("Table state changed: {:?}", change);
        self.notify_subscribers(change);
        Ok(())
    }

    /// Notify all subscribers of a state change
    fn notify_subscribers(&self, change: StateChange) {
        let context = self.get_context();
        let mut subscribers = self.subscribers.write();

        // Remove any dead weak references
        subscribers.retain(|weak| weak.strong_count() > 0);

        for weak in subscribers.iter() {
            if let Some(subscriber) = weak.upgrade() {
                subscriber.on_state_change(change, &context);
            }
        }
    }
}

fn check_operand(column: &str, predicate: Predicate, value: &FilterValue) -> Result<(), StateError> {
    if value.fits(predicate) {
        Ok(())
    } else {
        Err(StateError::OperandMismatch {
            column: column.to_string(),
            predicate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn controller() -> TableStateController {
        TableStateController::new(VariantConfig::comparison())
    }

    fn on_page(controller: &TableStateController, page_index: usize) {
        controller.set_page_index(page_index);
        assert_eq!(controller.snapshot().pagination.page_index, page_index);
    }

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<StateChange>>,
    }

    impl TableStateSubscriber for Recorder {
        fn on_state_change(&self, change: StateChange, _context: &TableContext) {
            self.changes.lock().push(change);
        }
    }

    #[test]
    fn test_filter_change_resets_page() {
        let controller = controller();
        on_page(&controller, 4);

        controller.set_filter("norad_ids", Some(FilterValue::single("25544"))).unwrap();

        let state = controller.snapshot();
        assert_eq!(state.pagination.page_index, 0);
        assert_eq!(state.filters.get("norad_ids"), Some(&FilterValue::single("25544")));
    }

    #[test]
    fn test_predicate_sort_and_search_reset_page() {
        let controller = controller();

        on_page(&controller, 2);
        controller.set_predicate("dca", Predicate::LessThan).unwrap();
        assert_eq!(controller.snapshot().pagination.page_index, 0);

        on_page(&controller, 2);
        controller.set_sort(vec![SortKey::descending("dca")]).unwrap();
        assert_eq!(controller.snapshot().pagination.page_index, 0);

        on_page(&controller, 2);
        controller.set_global_search(Some("iss".to_string()));
        assert_eq!(controller.snapshot().pagination.page_index, 0);
    }

    #[test]
    fn test_pagination_leaves_other_slices_alone() {
        let controller = controller();
        controller.set_filter("dca", Some(FilterValue::range(Some("0"), Some("1")))).unwrap();
        controller.set_sort(vec![SortKey::ascending("tca")]).unwrap();
        controller.set_global_search(Some("cosmos".to_string()));
        let before = controller.snapshot();

        controller.set_page_index(5);
        controller.set_page_size(50).unwrap();

        let after = controller.snapshot();
        assert_eq!(after.filters, before.filters);
        assert_eq!(after.filter_predicates, before.filter_predicates);
        assert_eq!(after.sort, before.sort);
        assert_eq!(after.global_search, before.global_search);
    }

    #[test]
    fn test_page_size_keeps_first_row_visible() {
        let controller = controller();
        controller.set_page_index(4); // rows 100..125
        controller.set_page_size(50).unwrap();
        assert_eq!(controller.snapshot().pagination.page_index, 2);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let controller = controller();
        assert!(matches!(
            controller.set_page_size(0),
            Err(StateError::InvalidPageSize { requested: 0, .. })
        ));
        assert!(controller.set_page_size(501).is_err());
        assert_eq!(controller.snapshot().pagination.page_size, 25);
    }

    #[test]
    fn test_filter_validation() {
        let controller = controller();
        assert!(matches!(
            controller.set_filter("tca", Some(FilterValue::single("x"))),
            Err(StateError::NotFilterable(_))
        ));
        assert!(matches!(
            controller.set_filter("nope", Some(FilterValue::single("x"))),
            Err(StateError::UnknownColumn(_))
        ));
        assert!(matches!(
            controller.set_filter("dca", Some(FilterValue::single("1"))),
            Err(StateError::OperandMismatch { .. })
        ));
        assert!(matches!(
            controller.set_predicate("norad_ids", Predicate::Between),
            Err(StateError::PredicateNotAllowed { .. })
        ));
    }

    #[test]
    fn test_rejected_mutation_keeps_state() {
        let controller = controller();
        on_page(&controller, 3);
        let before = controller.snapshot();

        let _ = controller.set_filters(vec![
            (ColumnId::from("dca"), FilterValue::range(Some("0"), None)),
            (ColumnId::from("dca"), FilterValue::range(Some("1"), None)),
        ]);

        assert_eq!(controller.snapshot(), before);
    }

    #[test]
    fn test_predicate_switch_drops_mismatched_filter() {
        let controller = controller();
        controller.set_filter("dca", Some(FilterValue::range(Some("0"), Some("2")))).unwrap();

        controller.set_predicate("dca", Predicate::BetweenInclusive).unwrap();
        assert!(controller.snapshot().filters.contains_key("dca"));

        controller.set_predicate("dca", Predicate::GreaterThan).unwrap();
        assert!(!controller.snapshot().filters.contains_key("dca"));
    }

    #[test]
    fn test_sort_validation() {
        let controller = controller();
        assert!(matches!(
            controller.set_sort(vec![SortKey::ascending("norad_ids")]),
            Err(StateError::NotSortable(_))
        ));
        assert!(matches!(
            controller.set_sort(vec![SortKey::ascending("dca"), SortKey::descending("dca")]),
            Err(StateError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_toggle_sort_cycles() {
        let controller = controller();
        controller.toggle_sort("dca").unwrap();
        assert_eq!(controller.snapshot().sort, vec![SortKey::ascending("dca")]);
        controller.toggle_sort("dca").unwrap();
        assert_eq!(controller.snapshot().sort, vec![SortKey::descending("dca")]);
        controller.toggle_sort("dca").unwrap();
        assert!(controller.snapshot().sort.is_empty());
    }

    #[test]
    fn test_blank_search_clears() {
        let controller = controller();
        controller.set_global_search(Some("  starlink ".to_string()));
        assert_eq!(controller.snapshot().global_search.as_deref(), Some("starlink"));
        controller.set_global_search(Some("   ".to_string()));
        assert_eq!(controller.snapshot().global_search, None);
    }

    #[test]
    fn test_refresh_does_not_touch_state() {
        let controller = controller();
        on_page(&controller, 2);
        let before = controller.snapshot();

        assert_eq!(controller.request_refresh(), 1);
        assert_eq!(controller.request_refresh(), 2);

        assert_eq!(controller.snapshot(), before);
        assert_eq!(controller.refresh_generation(), 2);
    }

    #[test]
    fn test_next_and_previous_page() {
        let controller = controller();
        assert_eq!(controller.previous_page(), Err(StateError::AtFirstPage));

        controller.reconcile_total(60);
        assert_eq!(controller.page_count(), Some(3));
        controller.next_page().unwrap();
        controller.next_page().unwrap();
        assert_eq!(controller.next_page(), Err(StateError::AtLastPage));
        controller.previous_page().unwrap();
        assert_eq!(controller.snapshot().pagination.page_index, 1);
    }

    #[test]
    fn test_shrinking_total_clamps_page() {
        let controller = controller();
        controller.set_page_index(10);

        assert!(controller.reconcile_total(60));
        assert_eq!(controller.snapshot().pagination.page_index, 2);

        assert!(!controller.reconcile_total(60));
        assert!(controller.reconcile_total(0));
        assert_eq!(controller.snapshot().pagination.page_index, 0);
    }

    #[test]
    fn test_subscribers_notified() {
        let controller = controller();
        let recorder = Arc::new(Recorder::default());
        controller.add_subscriber(recorder.clone());

        controller.set_page_index(1);
        controller.set_sort(vec![SortKey::ascending("tca")]).unwrap();
        controller.request_refresh();
        let _ = controller.set_sort(vec![SortKey::ascending("norad_ids")]);

        assert_eq!(
            *recorder.changes.lock(),
            vec![StateChange::Pagination, StateChange::Sort, StateChange::Refresh]
        );
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let controller = controller();
        let recorder = Arc::new(Recorder::default());
        controller.add_subscriber(recorder.clone());
        drop(recorder);

        controller.set_page_index(1);
        assert!(controller.subscribers.read().is_empty());
    }
}
