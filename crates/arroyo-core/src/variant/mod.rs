//! Per-variant table configuration
//!
//! The public, comparison and internal conjunction tables share one
//! controller and one projector. Everything that differs between them
//! (column set, filter predicates, severity fractions, paging limits)
//! lives in a [`VariantConfig`].

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a table column, as used on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(String);

impl ColumnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ColumnId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ColumnId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ColumnId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filter predicate kinds understood by the data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    Equals,
    Contains,
    LessThan,
    GreaterThan,
    Between,
    BetweenInclusive,
}

impl Predicate {
    /// Range predicates carry two operands, all others carry one
    pub fn is_range(self) -> bool {
        matches!(self, Predicate::Between | Predicate::BetweenInclusive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Predicate::Equals => "equals",
            Predicate::Contains => "contains",
            Predicate::LessThan => "lessThan",
            Predicate::GreaterThan => "greaterThan",
            Predicate::Between => "between",
            Predicate::BetweenInclusive => "betweenInclusive",
        }
    }

    /// The four range-based predicates, in the order the tables offer them
    pub fn range_family() -> Vec<Predicate> {
        vec![
            Predicate::LessThan,
            Predicate::GreaterThan,
            Predicate::Between,
            Predicate::BetweenInclusive,
        ]
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a column's raw value is shaped and presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Non-negative integer identifier
    Integer,
    /// Floating-point measurement, shown at fixed significant digits
    Float,
    /// UTC timestamp
    Timestamp,
    /// Two identifiers joined by the composite separator
    IdPair,
    /// Two `NAME [status]` entries joined by the composite separator
    NamePair,
    /// Free text, shown verbatim
    Text,
}

/// Filtering capabilities of a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub allowed: Vec<Predicate>,
    pub default: Predicate,
}

impl FilterSpec {
    pub fn single(predicate: Predicate) -> Self {
        Self {
            allowed: vec![predicate],
            default: predicate,
        }
    }

    pub fn range() -> Self {
        Self {
            allowed: Predicate::range_family(),
            default: Predicate::Between,
        }
    }

    pub fn allows(&self, predicate: Predicate) -> bool {
        self.allowed.contains(&predicate)
    }
}

/// A single column of a conjunction table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub id: ColumnId,
    pub title: String,
    pub kind: ColumnKind,
    pub sortable: bool,
    pub filter: Option<FilterSpec>,
}

impl ColumnSpec {
    pub fn new(id: &str, title: &str, kind: ColumnKind) -> Self {
        Self {
            id: ColumnId::from(id),
            title: title.to_string(),
            kind,
            sortable: false,
            filter: None,
        }
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn filterable(mut self, filter: FilterSpec) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Severity buckets are derived from a dataset-supplied threshold
/// multiplied by these fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityScale {
    /// Values below `threshold * high_fraction` are high severity
    pub high_fraction: f64,
    /// Values below `threshold * medium_fraction` are medium severity
    pub medium_fraction: f64,
}

impl SeverityScale {
    /// Absolute `(high, medium)` bounds for a given threshold
    pub fn bounds(&self, threshold: f64) -> (f64, f64) {
        (threshold * self.high_fraction, threshold * self.medium_fraction)
    }
}

impl Default for SeverityScale {
    fn default() -> Self {
        Self {
            high_fraction: 0.1,
            medium_fraction: 0.5,
        }
    }
}

/// The displayed conjunction tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableVariant {
    Public,
    Comparison,
    Internal,
}

impl TableVariant {
    /// Path of the paged query endpoint serving this variant
    pub fn endpoint(self) -> &'static str {
        match self {
            TableVariant::Public => "/public_conjunctions/",
            TableVariant::Comparison => "/socrates_comparison/",
            TableVariant::Internal => "/conjunctions/",
        }
    }

    /// Request members holding the filter predicates and the active filters
    ///
    /// The internal endpoint takes no filters at all.
    pub fn filter_fields(self) -> Option<(&'static str, &'static str)> {
        match self {
            TableVariant::Public => Some(("conjunctions_filter_fns", "conjunctions_filters")),
            TableVariant::Comparison => Some(("filter_fns", "filters")),
            TableVariant::Internal => None,
        }
    }

    pub fn config(self) -> VariantConfig {
        match self {
            TableVariant::Public => VariantConfig::public(),
            TableVariant::Comparison => VariantConfig::comparison(),
            TableVariant::Internal => VariantConfig::internal(),
        }
    }
}

impl fmt::Display for TableVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableVariant::Public => "public",
            TableVariant::Comparison => "comparison",
            TableVariant::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for TableVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(TableVariant::Public),
            "comparison" => Ok(TableVariant::Comparison),
            "internal" => Ok(TableVariant::Internal),
            other => Err(format!("unknown table variant '{}'", other)),
        }
    }
}

/// Complete description of one table variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub variant: TableVariant,
    pub columns: Vec<ColumnSpec>,
    /// Numeric column classified into severity buckets
    pub severity_column: Option<ColumnId>,
    pub severity: SeverityScale,
    /// Threshold used when a response carries none
    pub fallback_threshold: f64,
    /// Raw field holding a stable row key, if the source provides one
    pub row_key: Option<String>,
    /// Raw field holding the expansion samples, if the source provides them
    pub expansion_field: Option<String>,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

/// Page size limit enforced by the conjunction endpoints
pub const MAX_PAGE_SIZE: usize = 500;

/// Page size shown when a table is first opened
pub const DEFAULT_PAGE_SIZE: usize = 25;

impl VariantConfig {
    pub fn public() -> Self {
        Self {
            variant: TableVariant::Public,
            columns: vec![
                ColumnSpec::new("norad_id_i", "NORAD ID (i)", ColumnKind::Integer)
                    .sortable()
                    .filterable(FilterSpec::single(Predicate::Equals)),
                ColumnSpec::new("norad_id_j", "NORAD ID (j)", ColumnKind::Integer)
                    .sortable()
                    .filterable(FilterSpec::single(Predicate::Equals)),
                ColumnSpec::new("tca", "TCA (UTC)", ColumnKind::Timestamp).sortable(),
                ColumnSpec::new("tca_pj", "TCA (days)", ColumnKind::Float).sortable(),
                ColumnSpec::new("dca", "DCA (km)", ColumnKind::Float)
                    .sortable()
                    .filterable(FilterSpec::range()),
                ColumnSpec::new("relative_speed", "Relative speed (km/s)", ColumnKind::Float)
                    .sortable()
                    .filterable(FilterSpec::range()),
            ],
            severity_column: Some(ColumnId::from("dca")),
            severity: SeverityScale::default(),
            fallback_threshold: 5.0,
            row_key: None,
            expansion_field: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn comparison() -> Self {
        Self {
            variant: TableVariant::Comparison,
            columns: vec![
                ColumnSpec::new("norad_ids", "NORAD IDs", ColumnKind::IdPair)
                    .filterable(FilterSpec::single(Predicate::Contains)),
                ColumnSpec::new("object_names", "Object names", ColumnKind::NamePair)
                    .filterable(FilterSpec::single(Predicate::Contains)),
                ColumnSpec::new("tca", "TCA (UTC)", ColumnKind::Timestamp).sortable(),
                ColumnSpec::new("dca", "DCA (km)", ColumnKind::Float)
                    .sortable()
                    .filterable(FilterSpec::range()),
                ColumnSpec::new("relative_speed", "Relative speed (km/s)", ColumnKind::Float)
                    .sortable()
                    .filterable(FilterSpec::range()),
                ColumnSpec::new("tca_diff", "TCA diff (ms)", ColumnKind::Float)
                    .sortable()
                    .filterable(FilterSpec::range()),
                ColumnSpec::new("dca_diff", "DCA diff (m)", ColumnKind::Float)
                    .sortable()
                    .filterable(FilterSpec::range()),
                ColumnSpec::new("relative_speed_diff", "Rel. speed diff (m/s)", ColumnKind::Float)
                    .sortable()
                    .filterable(FilterSpec::range()),
            ],
            severity_column: Some(ColumnId::from("dca")),
            // The comparison table flags a wider band than the public one.
            severity: SeverityScale {
                high_fraction: 0.2,
                medium_fraction: 1.0,
            },
            fallback_threshold: 5.0,
            row_key: Some("conj_index".to_string()),
            expansion_field: Some("expanded_data".to_string()),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn internal() -> Self {
        let mut config = Self::public();
        config.variant = TableVariant::Internal;
        for column in &mut config.columns {
            column.filter = None;
        }
        config
    }

    pub fn column(&self, id: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.id.as_str() == id)
    }

    pub fn filterable_columns(&self) -> impl Iterator<Item = (&ColumnId, &FilterSpec)> {
        self.columns
            .iter()
            .filter_map(|c| c.filter.as_ref().map(|f| (&c.id, f)))
    }

    /// Initial predicate of every filterable column
    pub fn default_predicates(&self) -> BTreeMap<ColumnId, Predicate> {
        self.filterable_columns()
            .map(|(id, filter)| (id.clone(), filter.default))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_filterable_column_has_allowed_default() {
        for variant in [TableVariant::Public, TableVariant::Comparison, TableVariant::Internal] {
            let config = variant.config();
            for (_, filter) in config.filterable_columns() {
                assert!(filter.allows(filter.default));
            }
        }
    }

    #[test]
    fn test_internal_variant_has_no_filters() {
        let config = VariantConfig::internal();
        assert_eq!(config.filterable_columns().count(), 0);
        assert!(config.default_predicates().is_empty());
        assert!(config.column("dca").map(|c| c.sortable).unwrap_or(false));
    }

    #[test]
    fn test_severity_bounds_scale_with_threshold() {
        let scale = SeverityScale::default();
        assert_eq!(scale.bounds(5.0), (0.5, 2.5));
        assert_eq!(VariantConfig::comparison().severity.bounds(5.0), (1.0, 5.0));
    }

    #[test]
    fn test_predicate_wire_names() {
        let json = serde_json::to_string(&Predicate::BetweenInclusive).unwrap();
        assert_eq!(json, "\"betweenInclusive\"");
        let parsed: Predicate = serde_json::from_str("\"lessThan\"").unwrap();
        assert_eq!(parsed, Predicate::LessThan);
        assert_eq!(Predicate::GreaterThan.to_string(), "greaterThan");
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!("Comparison".parse::<TableVariant>(), Ok(TableVariant::Comparison));
        assert_eq!("public".parse::<TableVariant>().map(TableVariant::endpoint), Ok("/public_conjunctions/"));
        assert!("socrates".parse::<TableVariant>().is_err());
    }
}
