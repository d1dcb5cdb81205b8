use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::variant::{ColumnId, Predicate, VariantConfig};

/// Operand(s) of an active column filter, kept as the user typed them
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Operand of `equals`, `contains`, `lessThan` and `greaterThan`
    Single(String),
    /// Lower/upper operand of `between` and `betweenInclusive`; either end may be blank
    Range(Option<String>, Option<String>),
}

impl FilterValue {
    pub fn single(value: impl Into<String>) -> Self {
        FilterValue::Single(value.into())
    }

    pub fn range(low: Option<&str>, high: Option<&str>) -> Self {
        FilterValue::Range(low.map(str::to_string), high.map(str::to_string))
    }

    /// Whether the operand shape matches the predicate's arity
    pub fn fits(&self, predicate: Predicate) -> bool {
        match self {
            FilterValue::Single(_) => !predicate.is_range(),
            FilterValue::Range(..) => predicate.is_range(),
        }
    }
}

/// One sort key; the position in [`TableState::sort`] is its priority
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub column: ColumnId,
    pub descending: bool,
}

impl SortKey {
    pub fn ascending(column: &str) -> Self {
        Self {
            column: ColumnId::from(column),
            descending: false,
        }
    }

    pub fn descending(column: &str) -> Self {
        Self {
            column: ColumnId::from(column),
            descending: true,
        }
    }
}

/// Current page window; `page_size` is never zero once validated by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    pub page_index: usize,
    pub page_size: usize,
}

impl Pagination {
    pub fn new(page_index: usize, page_size: usize) -> Self {
        Self {
            page_index,
            page_size,
        }
    }

    /// Row offset of the first row on this page
    pub fn offset(&self) -> usize {
        self.page_index.saturating_mul(self.page_size)
    }

    /// Number of pages needed for `total_rows` rows
    pub fn page_count(&self, total_rows: u64) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        let total = usize::try_from(total_rows).unwrap_or(usize::MAX);
        total.div_ceil(self.page_size)
    }
}

/// The mutable UI state of one conjunction table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableState {
    /// Active filters; at most one per column
    pub filters: BTreeMap<ColumnId, FilterValue>,
    /// Selected predicate for every filterable column
    pub filter_predicates: BTreeMap<ColumnId, Predicate>,
    /// Sort keys in priority order; empty means source order
    pub sort: Vec<SortKey>,
    pub pagination: Pagination,
    pub global_search: Option<String>,
}

impl TableState {
    /// Initial state for a variant: no filters, default predicates, first page
    pub fn new(config: &VariantConfig) -> Self {
        Self {
            filters: BTreeMap::new(),
            filter_predicates: config.default_predicates(),
            sort: Vec::new(),
            pagination: Pagination::new(0, config.default_page_size),
            global_search: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantConfig;

    #[test]
    fn test_offset_computation() {
        let pagination = Pagination::new(3, 25);
        assert_eq!(pagination.offset(), 75);
    }

    #[test]
    fn test_page_count() {
        let pagination = Pagination::new(0, 25);
        assert_eq!(pagination.page_count(0), 0);
        assert_eq!(pagination.page_count(25), 1);
        assert_eq!(pagination.page_count(26), 2);
    }

    #[test]
    fn test_filter_value_fits_predicate() {
        assert!(FilterValue::single("3").fits(Predicate::LessThan));
        assert!(!FilterValue::single("3").fits(Predicate::Between));
        assert!(FilterValue::range(Some("1"), None).fits(Predicate::BetweenInclusive));
        assert!(!FilterValue::range(None, None).fits(Predicate::Equals));
    }

    #[test]
    fn test_filter_value_wire_shape() {
        let range = serde_json::to_value(FilterValue::range(Some("0.5"), None)).unwrap();
        assert_eq!(range, serde_json::json!(["0.5", null]));
        let single = serde_json::to_value(FilterValue::single("25544")).unwrap();
        assert_eq!(single, serde_json::json!("25544"));
    }

    #[test]
    fn test_initial_state_uses_variant_defaults() {
        let config = VariantConfig::comparison();
        let state = TableState::new(&config);
        assert!(state.filters.is_empty());
        assert_eq!(state.filter_predicates.get("dca"), Some(&Predicate::Between));
        assert_eq!(state.filter_predicates.get("norad_ids"), Some(&Predicate::Contains));
        assert_eq!(state.pagination, Pagination::new(0, config.default_page_size));
    }
}
