//! Dataset summary shown above a conjunction table

use std::time::Duration;

use arroyo_core::DatasetSummary;

use crate::format::{format_timestamp, parse_timestamp};

/// One labelled line of the summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    pub label: &'static str,
    pub value: String,
}

/// Dataset-wide facts that outlive any single page
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummaryView {
    pub lines: Vec<SummaryLine>,
}

impl DatasetSummaryView {
    /// Build the summary for a page's aggregates and its filtered total
    pub fn new(summary: &DatasetSummary, total_row_count: u64) -> Self {
        let mut lines = Vec::new();
        let mut push = |label, value: String| lines.push(SummaryLine { label, value });

        match summary.total_events {
            Some(total) if total != total_row_count => {
                push("Conjunctions", format!("{} of {}", total_row_count, total));
            }
            _ => push("Conjunctions", total_row_count.to_string()),
        }

        if let Some(generated_at) = &summary.generated_at {
            push("Generated", display_time(generated_at));
        }

        if let Some(secs) = summary.computation_secs.filter(|s| s.is_finite() && *s >= 0.0) {
            // Whole seconds are plenty for a multi-minute computation
            let rounded = Duration::from_secs(secs.round() as u64);
            push("Computation time", humantime::format_duration(rounded).to_string());
        }

        if let Some(missed) = summary.missed_events {
            push("Missed conjunctions", missed.to_string());
        }

        if let (Some(begin), Some(end)) = (&summary.window_begin, &summary.window_end) {
            push("Window", format!("{} to {}", display_time(begin), display_time(end)));
        }

        if let Some(threshold) = summary.threshold {
            push("Threshold (km)", threshold.to_string());
        }

        Self { lines }
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|line| line.label == label)
            .map(|line| line.value.as_str())
    }
}

fn display_time(text: &str) -> String {
    parse_timestamp(text)
        .map(|ts| format_timestamp(&ts))
        .unwrap_or_else(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_summary() {
        let summary = DatasetSummary {
            total_events: Some(4000),
            generated_at: Some("2024-05-01 00:00:00".to_string()),
            computation_secs: Some(93.4),
            missed_events: Some(3),
            window_begin: Some("2024-05-01 00:00:00".to_string()),
            window_end: Some("2024-05-08 00:00:00".to_string()),
            threshold: Some(5.0),
        };

        let view = DatasetSummaryView::new(&summary, 120);

        assert_eq!(view.get("Conjunctions"), Some("120 of 4000"));
        assert_eq!(view.get("Generated"), Some("2024-05-01 00:00:00.000"));
        assert_eq!(view.get("Computation time"), Some("1m 33s"));
        assert_eq!(view.get("Missed conjunctions"), Some("3"));
        assert_eq!(
            view.get("Window"),
            Some("2024-05-01 00:00:00.000 to 2024-05-08 00:00:00.000")
        );
    }

    #[test]
    fn test_sparse_summary() {
        let view = DatasetSummaryView::new(&DatasetSummary::default(), 42);

        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.get("Conjunctions"), Some("42"));
        assert_eq!(view.get("Generated"), None);
    }
}
