//! Query descriptors and the paged-query wire request
//!
//! A [`QueryDescriptor`] is a pure function of a [`TableState`]: equal
//! states always build equal descriptors, so descriptors can be used
//! directly as cache and in-flight keys.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::state::{FilterValue, SortKey, TableState};
use crate::variant::{ColumnId, Predicate, TableVariant};

/// Canonical description of the page being requested
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryDescriptor {
    pub offset: usize,
    pub limit: usize,
    pub sort: Vec<SortKey>,
    /// Active filters in column-id order
    pub filters: Vec<(ColumnId, FilterValue)>,
    /// Predicate of every filterable column in column-id order
    pub filter_predicates: Vec<(ColumnId, Predicate)>,
    pub global_search: Option<String>,
}

impl QueryDescriptor {
    /// Build the descriptor for a table state snapshot
    pub fn build(state: &TableState) -> Self {
        Self {
            offset: state.pagination.offset(),
            limit: state.pagination.page_size,
            sort: state.sort.clone(),
            filters: state
                .filters
                .iter()
                .map(|(id, value)| (id.clone(), value.clone()))
                .collect(),
            filter_predicates: state
                .filter_predicates
                .iter()
                .map(|(id, predicate)| (id.clone(), *predicate))
                .collect(),
            global_search: state.global_search.clone(),
        }
    }

    /// Zero-based index of the requested page
    pub fn page_index(&self) -> usize {
        if self.limit == 0 {
            0
        } else {
            self.offset / self.limit
        }
    }

    pub fn predicate_for(&self, column: &str) -> Option<Predicate> {
        self.filter_predicates
            .iter()
            .find(|(id, _)| id.as_str() == column)
            .map(|(_, predicate)| *predicate)
    }

    /// Request body sent to the endpoint serving `variant`
    pub fn to_request(&self, variant: TableVariant) -> QueryRequest {
        QueryRequest {
            variant,
            begin: self.offset,
            nrows: self.limit,
            sorting: self
                .sort
                .iter()
                .map(|key| ColumnSort {
                    id: key.column.clone(),
                    desc: key.descending,
                })
                .collect(),
            filter_fns: self.filter_predicates.iter().cloned().collect(),
            filters: self
                .filters
                .iter()
                .map(|(id, value)| ColumnFilter {
                    id: id.clone(),
                    value: value.clone(),
                })
                .collect(),
            global_filter: self.global_search.clone(),
        }
    }
}

impl From<&TableState> for QueryDescriptor {
    fn from(state: &TableState) -> Self {
        QueryDescriptor::build(state)
    }
}

/// One sort key on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSort {
    pub id: ColumnId,
    pub desc: bool,
}

/// One active filter on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub id: ColumnId,
    pub value: FilterValue,
}

/// JSON body of a paged conjunction query
///
/// The names of the filter members differ between endpoints, see
/// [`TableVariant::filter_fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub variant: TableVariant,
    pub begin: usize,
    pub nrows: usize,
    pub sorting: Vec<ColumnSort>,
    pub filter_fns: BTreeMap<ColumnId, Predicate>,
    pub filters: Vec<ColumnFilter>,
    pub global_filter: Option<String>,
}

impl Serialize for QueryRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("begin", &self.begin)?;
        map.serialize_entry("nrows", &self.nrows)?;
        map.serialize_entry("sorting", &self.sorting)?;
        if let Some((fns_key, filters_key)) = self.variant.filter_fields() {
            map.serialize_entry(fns_key, &self.filter_fns)?;
            map.serialize_entry(filters_key, &self.filters)?;
        }
        if let Some(search) = &self.global_filter {
            map.serialize_entry("global_filter", search)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Pagination;
    use crate::variant::VariantConfig;

    fn comparison_state() -> TableState {
        TableState::new(&VariantConfig::comparison())
    }

    #[test]
    fn test_offset_and_limit() {
        let mut state = comparison_state();
        state.pagination = Pagination::new(3, 25);

        let request = QueryDescriptor::build(&state).to_request(TableVariant::Comparison);
        assert_eq!(request.begin, 75);
        assert_eq!(request.nrows, 25);
    }

    #[test]
    fn test_equal_states_build_equal_descriptors() {
        let mut a = comparison_state();
        a.filters.insert(ColumnId::from("dca"), FilterValue::range(Some("0"), Some("2")));
        a.filters.insert(ColumnId::from("norad_ids"), FilterValue::single("25544"));

        // Same filters inserted in the opposite order.
        let mut b = comparison_state();
        b.filters.insert(ColumnId::from("norad_ids"), FilterValue::single("25544"));
        b.filters.insert(ColumnId::from("dca"), FilterValue::range(Some("0"), Some("2")));

        assert_eq!(a, b);
        assert_eq!(QueryDescriptor::build(&a), QueryDescriptor::build(&b));
    }

    #[test]
    fn test_sort_order_is_significant() {
        let mut a = comparison_state();
        a.sort = vec![SortKey::ascending("tca"), SortKey::descending("dca")];
        let mut b = comparison_state();
        b.sort = vec![SortKey::descending("dca"), SortKey::ascending("tca")];

        assert_ne!(QueryDescriptor::build(&a), QueryDescriptor::build(&b));
    }

    #[test]
    fn test_empty_filters_serialize_as_empty_array() {
        let request = QueryDescriptor::build(&comparison_state()).to_request(TableVariant::Comparison);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["filters"], serde_json::json!([]));
        assert_eq!(json["filter_fns"]["dca"], "between");
        assert!(json.get("global_filter").is_none());
    }

    #[test]
    fn test_request_wire_shape() {
        let mut state = comparison_state();
        state.sort = vec![SortKey::descending("dca")];
        state.filters.insert(ColumnId::from("dca"), FilterValue::range(Some("0.1"), None));
        state.global_search = Some("starlink".to_string());

        let json = serde_json::to_value(QueryDescriptor::build(&state).to_request(TableVariant::Comparison)).unwrap();
        assert_eq!(json["sorting"], serde_json::json!([{ "id": "dca", "desc": true }]));
        assert_eq!(json["filters"], serde_json::json!([{ "id": "dca", "value": ["0.1", null] }]));
        assert_eq!(json["global_filter"], "starlink");
    }

    #[test]
    fn test_public_filter_members() {
        let mut state = TableState::new(&VariantConfig::public());
        state.filters.insert(ColumnId::from("norad_id_i"), FilterValue::single("25544"));

        let json = serde_json::to_value(QueryDescriptor::build(&state).to_request(TableVariant::Public)).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, ["begin", "conjunctions_filter_fns", "conjunctions_filters", "nrows", "sorting"]);
        assert_eq!(json["conjunctions_filter_fns"]["norad_id_i"], "equals");
        assert_eq!(
            json["conjunctions_filters"],
            serde_json::json!([{ "id": "norad_id_i", "value": "25544" }])
        );
    }

    #[test]
    fn test_internal_request_has_no_filter_members() {
        let state = TableState::new(&VariantConfig::internal());
        let json = serde_json::to_value(QueryDescriptor::build(&state).to_request(TableVariant::Internal)).unwrap();

        assert!(json.get("filter_fns").is_none());
        assert!(json.get("filters").is_none());
        assert_eq!(json["nrows"], 25);
    }

    #[test]
    fn test_page_index_round_trips_offset() {
        let mut state = comparison_state();
        state.pagination = Pagination::new(7, 50);
        let descriptor = QueryDescriptor::build(&state);
        assert_eq!(descriptor.page_index(), 7);
        assert_eq!(descriptor.predicate_for("relative_speed"), Some(Predicate::Between));
    }
}
