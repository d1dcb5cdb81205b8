//! Raw row to display row projection

use std::sync::Arc;

use arroyo_core::{ColumnId, ColumnKind, ColumnSpec, DatasetSummary, RawRow, ResponsePage, RowKey, VariantConfig};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::format::{format_significant, format_timestamp, parse_timestamp, SIGNIFICANT_DIGITS};

/// Separator between the two halves of a composite field
pub const COMPOSITE_SEPARATOR: &str = " | ";

/// A row that cannot be shown as the source sent it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("column '{column}': expected 2 parts in '{value}', found {parts}")]
    MalformedComposite { column: ColumnId, value: String, parts: usize },

    #[error("column '{column}': empty part in '{value}'")]
    EmptyCompositePart { column: ColumnId, value: String },

    #[error("column '{column}': expected {expected}, found {found}")]
    UnexpectedValue {
        column: ColumnId,
        expected: &'static str,
        found: String,
    },

    #[error("column '{column}': invalid timestamp '{value}'")]
    InvalidTimestamp { column: ColumnId, value: String },

    #[error("invalid expansion sample: {0}")]
    InvalidSample(String),
}

/// Severity bucket of a conjunction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// An object name with its operational status, as in `ISS (ZARYA) [+]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    pub name: String,
    pub status: Option<String>,
}

impl ObjectName {
    fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(open) = text.rfind(" [") {
            if let Some(status) = text[open + 2..].strip_suffix(']') {
                return Self {
                    name: text[..open].trim_end().to_string(),
                    status: Some(status.to_string()),
                };
            }
        }
        Self {
            name: text.to_string(),
            status: None,
        }
    }
}

/// The raw value of a cell, kept for computation
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Missing,
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Pair([String; 2]),
    Names([ObjectName; 2]),
    Text(String),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            CellValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayCell {
    pub column: ColumnId,
    /// Presentation text; never parsed back
    pub text: String,
    pub value: CellValue,
    pub severity: Option<Severity>,
}

/// One `(timestamp, distance)` point of an encounter
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterSample {
    pub timestamp: DateTime<Utc>,
    pub distance: f64,
}

impl EncounterSample {
    pub fn timestamp_text(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

/// A row ready for display
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRow {
    pub key: RowKey,
    /// Absolute position in the filtered, sorted result
    pub offset: usize,
    pub cells: Vec<DisplayCell>,
    pub severity: Option<Severity>,
    /// Why the row could not be projected
    pub degraded: Option<String>,
    expansion: Option<Value>,
}

impl DisplayRow {
    fn placeholder(key: RowKey, offset: usize, config: &VariantConfig, error: &ProjectionError) -> Self {
        Self {
            key,
            offset,
            cells: config
                .columns
                .iter()
                .map(|spec| DisplayCell {
                    column: spec.id.clone(),
                    text: "-".to_string(),
                    value: CellValue::Missing,
                    severity: None,
                })
                .collect(),
            severity: None,
            degraded: Some(error.to_string()),
            expansion: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn cell(&self, column: &str) -> Option<&DisplayCell> {
        self.cells.iter().find(|c| c.column.as_str() == column)
    }

    pub fn has_expansion(&self) -> bool {
        self.expansion.is_some()
    }

    /// Decode the expansion payload; only done when a row is expanded
    pub fn expansion_samples(&self) -> Result<Vec<EncounterSample>, ProjectionError> {
        let Some(payload) = &self.expansion else {
            return Ok(Vec::new());
        };
        let samples = payload
            .as_array()
            .ok_or_else(|| ProjectionError::InvalidSample(format!("expected an array, found {}", payload)))?;

        samples
            .iter()
            .map(|sample| {
                let date = sample.get("date").and_then(Value::as_str);
                let dist = sample.get("dist").and_then(Value::as_f64);
                match (date.and_then(parse_timestamp), dist) {
                    (Some(timestamp), Some(distance)) => Ok(EncounterSample { timestamp, distance }),
                    _ => Err(ProjectionError::InvalidSample(sample.to_string())),
                }
            })
            .collect()
    }
}

/// Projected rows of one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectedPage {
    pub rows: Vec<DisplayRow>,
    pub threshold: f64,
    pub degraded: usize,
}

/// Maps raw rows to display rows for one table variant
#[derive(Debug, Clone)]
pub struct RowProjector {
    config: Arc<VariantConfig>,
}

impl RowProjector {
    pub fn new(config: Arc<VariantConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VariantConfig {
        &self.config
    }

    /// Severity threshold for a page, taken from the data it classifies
    pub fn threshold(&self, summary: &DatasetSummary) -> f64 {
        summary
            .threshold
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(self.config.fallback_threshold)
    }

    pub fn classify(&self, value: f64, threshold: f64) -> Severity {
        let (high, medium) = self.config.severity.bounds(threshold);
        if value < high {
            Severity::High
        } else if value < medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Project a whole page; rows that fail become placeholders
    pub fn project_page(&self, page: &ResponsePage, offset: usize) -> ProjectedPage {
        let threshold = self.threshold(&page.summary);
        let mut degraded = 0;

        let rows = page
            .rows
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                let offset = offset + idx;
                self.project_row(raw, offset, threshold).unwrap_or_else(|e| {
                    warn!("Row at offset {} could not be projected: {}", offset, e);
                    degraded += 1;
                    DisplayRow::placeholder(self.row_key(raw, offset), offset, &self.config, &e)
                })
            })
            .collect();

        ProjectedPage { rows, threshold, degraded }
    }

    pub fn project_row(&self, raw: &RawRow, offset: usize, threshold: f64) -> Result<DisplayRow, ProjectionError> {
        let mut row_severity = None;
        let mut cells = Vec::with_capacity(self.config.columns.len());

        for spec in &self.config.columns {
            let (text, value) = project_cell(spec, raw.get(spec.id.as_str()))?;
            let severity = match (&self.config.severity_column, value.as_f64()) {
                (Some(column), Some(v)) if *column == spec.id => Some(self.classify(v, threshold)),
                _ => None,
            };
            if severity.is_some() {
                row_severity = severity;
            }
            cells.push(DisplayCell {
                column: spec.id.clone(),
                text,
                value,
                severity,
            });
        }

        let expansion = self
            .config
            .expansion_field
            .as_deref()
            .and_then(|field| raw.get(field))
            .filter(|v| !v.is_null())
            .cloned();

        Ok(DisplayRow {
            key: self.row_key(raw, offset),
            offset,
            cells,
            severity: row_severity,
            degraded: None,
            expansion,
        })
    }

    fn row_key(&self, raw: &RawRow, offset: usize) -> RowKey {
        self.config
            .row_key
            .as_deref()
            .and_then(|field| raw.get(field))
            .and_then(Value::as_i64)
            .map(RowKey::Source)
            .unwrap_or(RowKey::Offset(offset))
    }
}

fn project_cell(spec: &ColumnSpec, raw: Option<&Value>) -> Result<(String, CellValue), ProjectionError> {
    let value = match raw {
        None | Some(Value::Null) => return Ok((String::new(), CellValue::Missing)),
        Some(value) => value,
    };
    let unexpected = |expected: &'static str| ProjectionError::UnexpectedValue {
        column: spec.id.clone(),
        expected,
        found: value.to_string(),
    };

    match spec.kind {
        ColumnKind::Integer => {
            let v = value.as_i64().ok_or_else(|| unexpected("an integer"))?;
            Ok((v.to_string(), CellValue::Integer(v)))
        }
        ColumnKind::Float => {
            let v = value.as_f64().ok_or_else(|| unexpected("a number"))?;
            Ok((format_significant(v, SIGNIFICANT_DIGITS), CellValue::Float(v)))
        }
        ColumnKind::Timestamp => {
            let text = value.as_str().ok_or_else(|| unexpected("a timestamp string"))?;
            let ts = parse_timestamp(text).ok_or_else(|| ProjectionError::InvalidTimestamp {
                column: spec.id.clone(),
                value: text.to_string(),
            })?;
            Ok((format_timestamp(&ts), CellValue::Timestamp(ts)))
        }
        ColumnKind::IdPair => {
            let text = value.as_str().ok_or_else(|| unexpected("a composite string"))?;
            let [a, b] = split_composite(&spec.id, text)?;
            Ok((format!("{}{}{}", a, COMPOSITE_SEPARATOR, b), CellValue::Pair([a, b])))
        }
        ColumnKind::NamePair => {
            let text = value.as_str().ok_or_else(|| unexpected("a composite string"))?;
            let [a, b] = split_composite(&spec.id, text)?;
            Ok((
                format!("{}{}{}", a, COMPOSITE_SEPARATOR, b),
                CellValue::Names([ObjectName::parse(&a), ObjectName::parse(&b)]),
            ))
        }
        ColumnKind::Text => {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok((text.clone(), CellValue::Text(text)))
        }
    }
}

/// Split a composite field into exactly two non-empty parts
pub fn split_composite(column: &ColumnId, text: &str) -> Result<[String; 2], ProjectionError> {
    let parts: Vec<&str> = text.split(COMPOSITE_SEPARATOR).map(str::trim).collect();
    match parts.as_slice() {
        [a, b] if !a.is_empty() && !b.is_empty() => Ok([a.to_string(), b.to_string()]),
        [_, _] => Err(ProjectionError::EmptyCompositePart {
            column: column.clone(),
            value: text.to_string(),
        }),
        _ => Err(ProjectionError::MalformedComposite {
            column: column.clone(),
            value: text.to_string(),
            parts: parts.len(),
        }),
    }
}
