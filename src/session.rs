use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use serde_json::Value;

use crate::error::SqlViewError;

/// One loaded database file. The session owns the connection; dropping the
/// session releases it. The connection is opened read-only, so the file is
/// immutable for the lifetime of the session and reads need no transaction
/// isolation.
#[derive(Debug)]
pub struct Session {
    conn: Connection,
    path: PathBuf,
    loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
}

/// Point-in-time copy of rows from one table. Each row is positionally
/// aligned to `columns`; cells are null, number, or string (blobs surface
/// as hex strings).
#[derive(Debug, Clone, Serialize)]
pub struct TableSnapshot {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub path: String,
    pub database_size: Option<u64>,
    pub table_count: Option<usize>,
    pub last_modified: Option<DateTime<Utc>>,
    pub sqlite_version: String,
    pub loaded_at: DateTime<Utc>,
}

pub(crate) fn value_ref_to_json(v: rusqlite::types::ValueRef<'_>) -> Value {
    match v {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::Number(i.into()),
        rusqlite::types::ValueRef::Real(f) => Value::Number(
            serde_json::Number::from_f64(f).unwrap_or_else(|| serde_json::Number::from(0)),
        ),
        rusqlite::types::ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        rusqlite::types::ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

/// Display form of a snapshot cell: empty for null, the text itself for
/// strings, canonical decimal form for numbers.
pub(crate) fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Session {
    /// Open a database file read-only. Fails with `LoadFailed` when the
    /// path does not exist, has the wrong extension, or is not a SQLite
    /// database.
    pub fn open(path: &str) -> Result<Self, SqlViewError> {
        let path = Self::expand_path(path)?;
        Self::validate_db_path(&path)?;

        if !path.exists() {
            return Err(SqlViewError::LoadFailed(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let conn =
            Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|e| SqlViewError::LoadFailed(e.to_string()))?;

        // A bad file only fails on first use, so probe before accepting it.
        conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
            .map_err(|e| SqlViewError::LoadFailed(format!("not a SQLite database: {e}")))?;

        tracing::info!(path = %path.display(), "loaded database");

        Ok(Self {
            conn,
            path,
            loaded_at: Utc::now(),
        })
    }

    /// Expand `~/` to the user's home directory.
    fn expand_path(path: &str) -> Result<PathBuf, SqlViewError> {
        if let Some(rest) = path.strip_prefix("~/") {
            let base = home::home_dir().ok_or_else(|| {
                SqlViewError::LoadFailed("cannot determine home directory".into())
            })?;
            Ok(base.join(rest))
        } else {
            Ok(PathBuf::from(path))
        }
    }

    fn validate_db_path(path: &Path) -> Result<(), SqlViewError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("db") | Some("sqlite") | Some("sqlite3") => Ok(()),
            _ => Err(SqlViewError::LoadFailed(
                "invalid database file extension".into(),
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Names of user tables, ordered by name.
    pub fn list_tables(&self) -> Result<Vec<String>, SqlViewError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for row in rows {
            tables.push(row?);
        }
        Ok(tables)
    }

    /// Column metadata (in declaration order) and exact row count for one
    /// table.
    pub fn table_info(&self, table_name: &str) -> Result<TableInfo, SqlViewError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info([{table_name}])"))?;
        let rows = stmt.query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                data_type: row.get(2)?,
                not_null: row.get::<_, i32>(3)? != 0,
                default_value: row.get(4)?,
                primary_key: row.get::<_, i32>(5)? != 0,
            })
        })?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }

        let row_count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM [{table_name}]"), [], |row| {
                    row.get(0)
                })?;

        Ok(TableInfo {
            name: table_name.to_string(),
            columns,
            row_count,
        })
    }

    /// Fetch a raw snapshot of up to `limit` rows starting at `offset`.
    pub fn raw_rows(
        &self,
        table_name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<TableSnapshot, SqlViewError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM [{table_name}] LIMIT ? OFFSET ?"))?;
        let column_count = stmt.column_count();
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt.query_map([limit as i64, offset as i64], |row| {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(value_ref_to_json(row.get_ref(i)?));
            }
            Ok(values)
        })?;

        let mut data = Vec::new();
        for row in rows {
            data.push(row?);
        }

        Ok(TableSnapshot {
            columns,
            rows: data,
        })
    }

    /// Reject anything that is not a single read statement.
    fn validate_read_query(sql: &str) -> Result<(), SqlViewError> {
        let sql_trim = sql.trim_start();
        let sql_upper = sql_trim.to_ascii_uppercase();
        let allowed = ["SELECT", "PRAGMA", "EXPLAIN"];

        // Ensure exactly one statement (no extra semicolons).
        if sql_trim.matches(';').count() > 1 {
            return Err(SqlViewError::QueryFailed(
                "Multiple statements are not allowed".into(),
            ));
        }

        for cmd in &allowed {
            if sql_upper.starts_with(cmd) {
                return Ok(());
            }
        }

        Err(SqlViewError::QueryFailed(format!(
            "Only {} statements are allowed",
            allowed.join(", ")
        )))
    }

    /// Execute an arbitrary read query and return its rows.
    pub fn query(&self, sql: &str) -> Result<QueryOutput, SqlViewError> {
        Self::validate_read_query(sql)?;

        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt.query_map([], |row| {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(value_ref_to_json(row.get_ref(i)?));
            }
            Ok(values)
        })?;

        let mut data = Vec::new();
        for row in rows {
            data.push(row?);
        }

        let row_count = data.len();
        Ok(QueryOutput {
            columns,
            rows: data,
            row_count,
        })
    }

    /// Write the results of a read query to a CSV file. Returns the number
    /// of rows exported.
    pub fn export_csv(
        &self,
        query: &str,
        output_path: &str,
        include_headers: bool,
    ) -> Result<usize, SqlViewError> {
        Self::validate_read_query(query)?;

        let file = std::fs::File::create(output_path)?;
        let mut wtr = csv::Writer::from_writer(file);

        let mut stmt = self.conn.prepare(query)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        if include_headers {
            wtr.write_record(&column_names)?;
        }

        let rows = stmt.query_map([], |row| {
            let mut record = Vec::with_capacity(column_names.len());
            for i in 0..column_names.len() {
                let value = match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => String::new(),
                    rusqlite::types::ValueRef::Integer(i) => i.to_string(),
                    rusqlite::types::ValueRef::Real(f) => f.to_string(),
                    rusqlite::types::ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
                    rusqlite::types::ValueRef::Blob(b) => hex::encode(b),
                };
                record.push(value);
            }
            Ok(record)
        })?;

        let mut rows_exported = 0;
        for row in rows {
            wtr.write_record(&row?)?;
            rows_exported += 1;
        }

        wtr.flush()?;
        Ok(rows_exported)
    }

    /// Status information for the loaded database. Individual probes that
    /// fail report as absent rather than erroring.
    pub fn summary(&self) -> SessionSummary {
        let metadata = fs::metadata(&self.path).ok();
        let database_size = metadata.as_ref().map(|m| m.len());
        let last_modified = metadata
            .and_then(|m| m.modified().ok())
            .map(DateTime::from);

        let table_count: Option<usize> = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .ok()
            .map(|c| c as usize);

        let sqlite_version = self
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
            .unwrap_or_else(|_| "Unknown".to_string());

        SessionSummary {
            path: self.path.display().to_string(),
            database_size,
            table_count,
            last_modified,
            sqlite_version,
            loaded_at: self.loaded_at,
        }
    }
}
