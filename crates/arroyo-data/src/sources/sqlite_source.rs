//! SQLite conjunction source
//!
//! Answers the paged query contract from a local database: filtering,
//! sorting, paging and counting all happen in SQL.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arroyo_core::{
    ConjunctionSource, DatasetSummary, FilterValue, Predicate, QueryDescriptor, RawRow, ResponsePage,
    SourceError, TableVariant, VariantConfig,
};
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde_json::{json, Value};
use tracing::debug;

use crate::DataError;

/// Tables read by [`SqliteSource`]
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conjunctions (
    conj_index          INTEGER PRIMARY KEY,
    norad_id_i          INTEGER NOT NULL,
    norad_id_j          INTEGER NOT NULL,
    object_name_i       TEXT NOT NULL,
    object_name_j       TEXT NOT NULL,
    ops_status_i        TEXT NOT NULL,
    ops_status_j        TEXT NOT NULL,
    tca                 TEXT NOT NULL,
    tca_pj              REAL NOT NULL,
    dca                 REAL NOT NULL,
    relative_speed      REAL NOT NULL,
    tca_diff            REAL,
    dca_diff            REAL,
    relative_speed_diff REAL
);
CREATE TABLE IF NOT EXISTS encounters (
    conj_index INTEGER NOT NULL REFERENCES conjunctions(conj_index),
    seq        INTEGER NOT NULL,
    date       TEXT NOT NULL,
    dist       REAL NOT NULL,
    PRIMARY KEY (conj_index, seq)
);
CREATE TABLE IF NOT EXISTS dataset_meta (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    conj_ts       TEXT,
    comp_time     REAL,
    n_missed_conj INTEGER,
    date_begin    TEXT,
    date_end      TEXT,
    threshold     REAL
);
CREATE INDEX IF NOT EXISTS idx_conjunctions_tca ON conjunctions(tca);
CREATE INDEX IF NOT EXISTS idx_conjunctions_dca ON conjunctions(dca);
";

/// Create the conjunction tables if they do not exist
pub fn create_schema(conn: &Connection) -> Result<(), DataError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// One conjunction as stored in the database
#[derive(Debug, Clone, PartialEq)]
pub struct ConjunctionRecord {
    pub conj_index: i64,
    pub norad_id_i: i64,
    pub norad_id_j: i64,
    pub object_name_i: String,
    pub object_name_j: String,
    pub ops_status_i: String,
    pub ops_status_j: String,
    /// `YYYY-MM-DD HH:MM:SS.fff`, UTC
    pub tca: String,
    pub tca_pj: f64,
    pub dca: f64,
    pub relative_speed: f64,
    pub tca_diff: Option<f64>,
    pub dca_diff: Option<f64>,
    pub relative_speed_diff: Option<f64>,
    /// `(date, distance)` samples around the closest approach
    pub encounter: Vec<(String, f64)>,
}

/// Insert a conjunction and its encounter samples
pub fn insert_conjunction(conn: &Connection, record: &ConjunctionRecord) -> Result<(), DataError> {
    conn.execute(
        "INSERT INTO conjunctions (
            conj_index, norad_id_i, norad_id_j, object_name_i, object_name_j,
            ops_status_i, ops_status_j, tca, tca_pj, dca, relative_speed,
            tca_diff, dca_diff, relative_speed_diff
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            record.conj_index,
            record.norad_id_i,
            record.norad_id_j,
            record.object_name_i,
            record.object_name_j,
            record.ops_status_i,
            record.ops_status_j,
            record.tca,
            record.tca_pj,
            record.dca,
            record.relative_speed,
            record.tca_diff,
            record.dca_diff,
            record.relative_speed_diff,
        ],
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO encounters (conj_index, seq, date, dist) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (seq, (date, dist)) in record.encounter.iter().enumerate() {
        stmt.execute(params![record.conj_index, seq as i64, date, dist])?;
    }

    Ok(())
}

/// Replace the dataset-wide aggregates
pub fn write_summary(conn: &Connection, summary: &DatasetSummary) -> Result<(), DataError> {
    conn.execute(
        "INSERT OR REPLACE INTO dataset_meta (
            id, conj_ts, comp_time, n_missed_conj, date_begin, date_end, threshold
        ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            summary.generated_at,
            summary.computation_secs,
            summary.missed_events.map(|n| n as i64),
            summary.window_begin,
            summary.window_end,
            summary.threshold,
        ],
    )?;
    Ok(())
}

/// Conjunction source backed by a SQLite database
pub struct SqliteSource {
    path: PathBuf,
    name: String,
    config: Arc<VariantConfig>,
}

impl SqliteSource {
    /// Open a database, serving rows shaped for `variant`
    pub async fn open<P: AsRef<Path>>(path: P, variant: TableVariant) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();

        // Fail early on a missing or foreign database
        let conn = Self::connect(&path)?;
        let has_table: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'conjunctions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if has_table.is_none() {
            return Err(DataError::Config(format!(
                "{} has no conjunctions table",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("conjunctions.db")
            .to_string();

        Ok(Self {
            path,
            name,
            config: Arc::new(variant.config()),
        })
    }

    fn connect(path: &Path) -> Result<Connection, DataError> {
        Ok(Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }

    fn query_page(path: &Path, config: &VariantConfig, query: &QueryDescriptor) -> Result<ResponsePage, DataError> {
        let conn = Self::connect(path)?;
        let (where_sql, bindings) = where_clause(config, query)?;
        let order_sql = order_clause(config, query)?;

        let sql = format!(
            "SELECT {} FROM conjunctions{} ORDER BY {} LIMIT ? OFFSET ?",
            select_list(config.variant),
            where_sql,
            order_sql
        );
        debug!("{}", sql);

        let mut page_bindings = bindings.clone();
        page_bindings.push(SqlValue::Integer(query.limit as i64));
        page_bindings.push(SqlValue::Integer(query.offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query(params_from_iter(page_bindings))?;

        let mut page_rows = Vec::new();
        while let Some(row) = rows.next()? {
            let mut raw = RawRow::new();
            for (idx, name) in names.iter().enumerate() {
                raw.insert(name.clone(), json_value(row.get_ref(idx)?));
            }
            page_rows.push(raw);
        }

        if let Some(field) = &config.expansion_field {
            attach_encounters(&conn, field, &mut page_rows)?;
        }

        let filtered: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM conjunctions{}", where_sql),
            params_from_iter(bindings),
            |row| row.get(0),
        )?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM conjunctions", [], |row| row.get(0))?;

        let mut summary = read_summary(&conn)?;
        summary.total_events = Some(total as u64);

        Ok(ResponsePage {
            rows: page_rows,
            total_row_count: filtered as u64,
            summary,
        })
    }
}

#[async_trait]
impl ConjunctionSource for SqliteSource {
    async fn fetch_page(&self, query: &QueryDescriptor) -> Result<ResponsePage, SourceError> {
        let path = self.path.clone();
        let config = self.config.clone();
        let query = query.clone();

        let task = tokio::task::spawn_blocking(move || Self::query_page(&path, &config, &query));
        Ok(task.await.map_err(DataError::from)??)
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

fn select_list(variant: TableVariant) -> &'static str {
    match variant {
        TableVariant::Public | TableVariant::Internal => {
            "norad_id_i, norad_id_j, tca, tca_pj, dca, relative_speed"
        }
        TableVariant::Comparison => {
            "conj_index, \
             CAST(norad_id_i AS TEXT) || ' | ' || CAST(norad_id_j AS TEXT) AS norad_ids, \
             object_name_i || ' [' || ops_status_i || '] | ' || object_name_j || ' [' || ops_status_j || ']' AS object_names, \
             tca, dca, relative_speed, tca_diff, dca_diff, relative_speed_diff"
        }
    }
}

/// SQL expression of a physical column; never built from request text
fn sql_column(id: &str) -> Option<&'static str> {
    Some(match id {
        "norad_id_i" => "norad_id_i",
        "norad_id_j" => "norad_id_j",
        "tca" => "tca",
        "tca_pj" => "tca_pj",
        "dca" => "dca",
        "relative_speed" => "relative_speed",
        "tca_diff" => "tca_diff",
        "dca_diff" => "dca_diff",
        "relative_speed_diff" => "relative_speed_diff",
        _ => return None,
    })
}

fn where_clause(config: &VariantConfig, query: &QueryDescriptor) -> Result<(String, Vec<SqlValue>), DataError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut bindings: Vec<SqlValue> = Vec::new();

    for (column, value) in &query.filters {
        let spec = config
            .column(column.as_str())
            .and_then(|c| c.filter.as_ref())
            .ok_or_else(|| DataError::UnsupportedQuery(format!("column '{}' is not filterable", column)))?;
        let predicate = query.predicate_for(column.as_str()).unwrap_or(spec.default);
        if !spec.allows(predicate) {
            return Err(DataError::UnsupportedQuery(format!(
                "predicate '{}' is not allowed for column '{}'",
                predicate, column
            )));
        }

        // Operands that do not parse are ignored, like an empty filter box
        match (column.as_str(), predicate, value) {
            ("norad_ids", Predicate::Contains, FilterValue::Single(text)) => {
                if let Some(id) = parse_norad_id(text) {
                    clauses.push("(norad_id_i = ? OR norad_id_j = ?)".to_string());
                    bindings.push(SqlValue::Integer(id));
                    bindings.push(SqlValue::Integer(id));
                }
            }
            ("object_names", Predicate::Contains, FilterValue::Single(text)) => {
                let pattern = like_pattern(text);
                clauses.push("(object_name_i LIKE ? ESCAPE '\\' OR object_name_j LIKE ? ESCAPE '\\')".to_string());
                bindings.push(SqlValue::Text(pattern.clone()));
                bindings.push(SqlValue::Text(pattern));
            }
            (id, Predicate::Equals, FilterValue::Single(text)) => {
                if let (Some(sql), Some(norad_id)) = (sql_column(id), parse_norad_id(text)) {
                    clauses.push(format!("{} = ?", sql));
                    bindings.push(SqlValue::Integer(norad_id));
                }
            }
            (id, Predicate::LessThan | Predicate::GreaterThan, FilterValue::Single(text)) => {
                if let (Some(sql), Ok(bound)) = (sql_column(id), text.trim().parse::<f64>()) {
                    let op = if predicate == Predicate::LessThan { "<" } else { ">" };
                    clauses.push(format!("{} {} ?", sql, op));
                    bindings.push(SqlValue::Real(bound));
                }
            }
            (id, Predicate::Between | Predicate::BetweenInclusive, FilterValue::Range(low, high)) => {
                // A range missing either bound is ignored as a whole
                let (Some(sql), Some(low), Some(high)) = (sql_column(id), parse_bound(low), parse_bound(high)) else {
                    continue;
                };
                let (lower_op, upper_op) = if predicate == Predicate::Between { (">", "<") } else { (">=", "<=") };
                clauses.push(format!("{} {} ? AND {} {} ?", sql, lower_op, sql, upper_op));
                bindings.push(SqlValue::Real(low));
                bindings.push(SqlValue::Real(high));
            }
            _ => debug!("Ignoring filter on '{}': operand does not fit '{}'", column, predicate),
        }
    }

    if let Some(search) = &query.global_search {
        let pattern = like_pattern(search);
        let mut fields = vec!["CAST(norad_id_i AS TEXT)", "CAST(norad_id_j AS TEXT)"];
        if config.variant == TableVariant::Comparison {
            fields.extend(["object_name_i", "object_name_j"]);
        }
        let any = fields
            .iter()
            .map(|field| format!("{} LIKE ? ESCAPE '\\'", field))
            .collect::<Vec<_>>()
            .join(" OR ");
        clauses.push(format!("({})", any));
        bindings.extend(fields.iter().map(|_| SqlValue::Text(pattern.clone())));
    }

    if clauses.is_empty() {
        Ok((String::new(), bindings))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), bindings))
    }
}

fn order_clause(config: &VariantConfig, query: &QueryDescriptor) -> Result<String, DataError> {
    let mut keys = Vec::with_capacity(query.sort.len() + 1);
    for key in &query.sort {
        let sql = config
            .column(key.column.as_str())
            .filter(|c| c.sortable)
            .and_then(|c| sql_column(c.id.as_str()))
            .ok_or_else(|| DataError::UnsupportedQuery(format!("column '{}' is not sortable", key.column)))?;
        keys.push(format!("{} {}", sql, if key.descending { "DESC" } else { "ASC" }));
    }
    // Stable paging across equal sort keys
    keys.push("conj_index ASC".to_string());
    Ok(keys.join(", "))
}

/// NORAD ids are non-negative integers
fn parse_norad_id(text: &str) -> Option<i64> {
    text.trim().parse::<i64>().ok().filter(|id| *id >= 0)
}

fn parse_bound(bound: &Option<String>) -> Option<f64> {
    bound.as_deref()?.trim().parse::<f64>().ok()
}

fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn attach_encounters(conn: &Connection, field: &str, rows: &mut [RawRow]) -> Result<(), DataError> {
    let mut stmt = conn.prepare_cached("SELECT date, dist FROM encounters WHERE conj_index = ?1 ORDER BY seq")?;
    for row in rows.iter_mut() {
        let Some(conj_index) = row.get("conj_index").and_then(Value::as_i64) else {
            continue;
        };
        let samples = stmt
            .query_map([conj_index], |r| {
                Ok(json!({ "date": r.get::<_, String>(0)?, "dist": r.get::<_, f64>(1)? }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        row.insert(field.to_string(), Value::Array(samples));
    }
    Ok(())
}

fn read_summary(conn: &Connection) -> Result<DatasetSummary, DataError> {
    let summary = conn
        .query_row(
            "SELECT conj_ts, comp_time, n_missed_conj, date_begin, date_end, threshold
             FROM dataset_meta WHERE id = 1",
            [],
            |row| {
                Ok(DatasetSummary {
                    total_events: None,
                    generated_at: row.get(0)?,
                    computation_secs: row.get(1)?,
                    missed_events: row.get::<_, Option<i64>>(2)?.map(|n| n.max(0) as u64),
                    window_begin: row.get(3)?,
                    window_end: row.get(4)?,
                    threshold: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(summary.unwrap_or_default())
}
