//! The paged query contract of the external conjunction source

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::QueryDescriptor;

/// A row exactly as the source sent it
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Dataset-wide aggregates attached to every page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Total number of conjunctions in the dataset, before filtering
    #[serde(rename = "tot_nconj", default, skip_serializing_if = "Option::is_none")]
    pub total_events: Option<u64>,

    /// When the dataset was generated
    #[serde(rename = "conj_ts", default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,

    /// Wall-clock seconds spent computing the dataset
    #[serde(rename = "comp_time", default, skip_serializing_if = "Option::is_none")]
    pub computation_secs: Option<f64>,

    /// Conjunctions reported elsewhere but missed by the computation
    #[serde(rename = "n_missed_conj", default, skip_serializing_if = "Option::is_none")]
    pub missed_events: Option<u64>,

    #[serde(rename = "date_begin", default, skip_serializing_if = "Option::is_none")]
    pub window_begin: Option<String>,

    #[serde(rename = "date_end", default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<String>,

    /// Base distance threshold for severity classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// The source's answer to one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePage {
    /// Rows of the requested window, already filtered and sorted
    pub rows: Vec<RawRow>,

    /// Rows matching the filters across the whole dataset
    #[serde(rename = "tot_nrows")]
    pub total_row_count: u64,

    #[serde(flatten)]
    pub summary: DatasetSummary,
}

impl ResponsePage {
    pub fn new(rows: Vec<RawRow>, total_row_count: u64) -> Self {
        Self {
            rows,
            total_row_count,
            summary: DatasetSummary::default(),
        }
    }
}

/// Failures at the source boundary
///
/// Cloneable so a single outstanding request can report its outcome to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("source rejected the query with status {status}{}", detail_suffix(.message))]
    Rejected { status: u16, message: Option<String> },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("query failed: {0}")]
    Query(String),
}

fn detail_suffix(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

impl SourceError {
    /// No response was received at all
    pub fn is_transport(&self) -> bool {
        matches!(self, SourceError::Transport(_))
    }
}

/// A paged, filtered and sorted conjunction data source
#[async_trait]
pub trait ConjunctionSource: Send + Sync {
    /// Fetch the page described by `query`
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<ResponsePage, SourceError>;

    /// Get the source name, for logging
    fn source_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_page_parses_aggregates() {
        let body = serde_json::json!({
            "rows": [{ "norad_ids": "25544 | 48274", "dca": 0.42 }],
            "tot_nrows": 120,
            "tot_nconj": 4000,
            "conj_ts": "2024-05-01 12:00:00",
            "comp_time": 93.5,
            "n_missed_conj": 3,
            "date_begin": "2024-05-01 00:00:00",
            "date_end": "2024-05-08 00:00:00",
        });

        let page: ResponsePage = serde_json::from_value(body).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.total_row_count, 120);
        assert_eq!(page.summary.total_events, Some(4000));
        assert_eq!(page.summary.missed_events, Some(3));
        assert_eq!(page.summary.threshold, None);
    }

    #[test]
    fn test_minimal_response_page() {
        let page: ResponsePage =
            serde_json::from_value(serde_json::json!({ "rows": [], "tot_nrows": 0 })).unwrap();
        assert_eq!(page, ResponsePage::new(Vec::new(), 0));
    }

    #[test]
    fn test_rejected_error_message() {
        let err = SourceError::Rejected {
            status: 422,
            message: Some("nrows too large".to_string()),
        };
        assert_eq!(err.to_string(), "source rejected the query with status 422: nrows too large");
        assert!(!err.is_transport());
    }
}
