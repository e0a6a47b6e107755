// 📂 Raw Source Reader - SQLite snapshot → untyped records
// The backing store is treated as opaque: every value comes out as JSON,
// typing happens later in the validator/cleaner.

use crate::error::{PipelineError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

// ============================================================================
// SOURCE TABLES
// ============================================================================

/// The three tables every snapshot is expected to expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTable {
    Subscribers,
    Courses,
    JobHistory,
}

impl SourceTable {
    pub fn name(&self) -> &'static str {
        match self {
            SourceTable::Subscribers => "subscribers",
            SourceTable::Courses => "courses",
            SourceTable::JobHistory => "job_history",
        }
    }

    pub fn all() -> [SourceTable; 3] {
        [
            SourceTable::Subscribers,
            SourceTable::Courses,
            SourceTable::JobHistory,
        ]
    }
}

impl std::fmt::Display for SourceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// RAW RECORDS
// ============================================================================

/// Untyped row as read from the source: column name → raw value.
/// No invariants enforced yet.
pub type RawRecord = HashMap<String, Value>;

/// One raw table plus the column list the source actually exposed.
/// The column list drives the structural schema check.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub table: SourceTable,
    pub columns: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl RawTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Full raw snapshot: the three source tables read in one pass
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub subscribers: RawTable,
    pub courses: RawTable,
    pub job_history: RawTable,
}

impl Snapshot {
    /// Total input rows across all three tables (denominator for the
    /// quarantine ratio)
    pub fn input_rows(&self) -> usize {
        self.subscribers.len() + self.courses.len() + self.job_history.len()
    }
}

// ============================================================================
// READING
// ============================================================================

/// Read the three expected tables from the snapshot database.
/// A table that cannot be queried at all is a fatal source error.
/// Opened read-only: the pipeline never writes to the source.
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    Ok(Snapshot {
        subscribers: read_table(&conn, SourceTable::Subscribers)?,
        courses: read_table(&conn, SourceTable::Courses)?,
        job_history: read_table(&conn, SourceTable::JobHistory)?,
    })
}

fn read_table(conn: &Connection, table: SourceTable) -> Result<RawTable> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {}", table.name()))
        .map_err(PipelineError::Source)?;

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let column_count = stmt.column_count();

    let rows = stmt
        .query_map([], |row| {
            let mut record = RawRecord::with_capacity(column_count);
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), raw_value(row.get_ref(idx)?));
            }
            Ok(record)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(RawTable {
        table,
        columns,
        rows,
    })
}

/// Map a SQLite value to JSON. Blobs have no place in this schema and are
/// treated as absent.
fn raw_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE subscribers (uuid TEXT, name TEXT, job_id REAL);
             INSERT INTO subscribers VALUES ('a1', 'Ada', 3.0);
             INSERT INTO subscribers VALUES ('b2', NULL, NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_read_table_columns_and_rows() {
        let conn = seeded_connection();
        let table = read_table(&conn, SourceTable::Subscribers).unwrap();

        assert_eq!(table.columns, vec!["uuid", "name", "job_id"]);
        assert_eq!(table.len(), 2);
        assert!(table.has_column("job_id"));
        assert!(!table.has_column("dob"));
    }

    #[test]
    fn test_read_table_value_mapping() {
        let conn = seeded_connection();
        let table = read_table(&conn, SourceTable::Subscribers).unwrap();

        let first = &table.rows[0];
        assert_eq!(first["uuid"], Value::String("a1".to_string()));
        assert_eq!(first["job_id"], serde_json::json!(3.0));

        let second = &table.rows[1];
        assert_eq!(second["name"], Value::Null);
        assert_eq!(second["job_id"], Value::Null);
    }

    #[test]
    fn test_missing_table_is_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        let result = read_table(&conn, SourceTable::Courses);

        assert!(result.is_err());
    }
}
