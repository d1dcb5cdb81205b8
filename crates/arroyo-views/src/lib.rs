//! Display layer of the conjunction tables: row projection, table views
//! and the dataset summary

pub mod format;
mod stats;
mod tables;

pub use stats::{DatasetSummaryView, SummaryLine};
pub use tables::{
    split_composite, CellValue, DisplayCell, DisplayRow, EncounterSample, ObjectName, ProjectedPage,
    ProjectionError, RowProjector, Severity, TableDisplay, TableView, COMPOSITE_SEPARATOR,
};
