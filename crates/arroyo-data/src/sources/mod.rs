pub mod http_source;
pub mod sqlite_source;

pub use http_source::HttpSource;
pub use sqlite_source::{create_schema, insert_conjunction, write_summary, ConjunctionRecord, SqliteSource};
