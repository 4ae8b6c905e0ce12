//! Aggregate statistics and normalized transaction records for one table,
//! both driven by best-effort column classification. Aggregate probes
//! against guessed columns default silently when the guess is wrong.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::SqlViewError;
use crate::heuristics::{classify_columns, leading_number, resolve_column};
use crate::session::{cell_text, value_ref_to_json, Session, TableSnapshot};

/// Distinct category values reported per table are capped here.
pub const CATEGORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct TableStats {
    pub total_transactions: i64,
    pub total_amount: f64,
    pub date_range: DateRange,
    pub categories: Vec<String>,
}

/// A row normalized into the shape the viewer presents: whichever columns
/// look like an id, a timestamp, an amount and so on, with fixed defaults
/// where the table has nothing suitable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub timestamp: String,
    pub amount: f64,
    pub description: String,
    pub category: String,
    pub payment_method: String,
}

const ID_COLUMNS: &[&str] = &["id"];
const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "date", "created_at", "datetime", "time"];
const AMOUNT_COLUMNS: &[&str] = &["amount", "total", "price", "value"];
const DESCRIPTION_COLUMNS: &[&str] = &["description", "name", "item", "product", "title"];
const CATEGORY_COLUMNS: &[&str] = &["category", "type", "class"];
const PAYMENT_COLUMNS: &[&str] = &["payment_method", "paymentmethod", "method", "payment"];

fn non_empty_text(cell: Option<&Value>) -> Option<String> {
    let cell = cell?;
    if cell.is_null() {
        return None;
    }
    let text = cell_text(cell);
    if text.is_empty() { None } else { Some(text) }
}

fn cell_i64(cell: Option<&Value>) -> Option<i64> {
    match cell? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn cell_f64(cell: Option<&Value>) -> Option<f64> {
    match cell? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

/// Map snapshot rows to transaction records. `offset` is the snapshot's
/// position in the table, used to synthesize ids for tables without one.
pub fn map_transactions(snapshot: &TableSnapshot, offset: usize) -> Vec<Transaction> {
    let id_idx = resolve_column(&snapshot.columns, ID_COLUMNS);
    let timestamp_idx = resolve_column(&snapshot.columns, TIMESTAMP_COLUMNS);
    let amount_idx = resolve_column(&snapshot.columns, AMOUNT_COLUMNS);
    let description_idx = resolve_column(&snapshot.columns, DESCRIPTION_COLUMNS);
    let category_idx = resolve_column(&snapshot.columns, CATEGORY_COLUMNS);
    let payment_idx = resolve_column(&snapshot.columns, PAYMENT_COLUMNS);

    let cell = |row: &Vec<Value>, idx: Option<usize>| idx.and_then(|i| row.get(i)).cloned();

    snapshot
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let id = cell_i64(cell(row, id_idx).as_ref())
                .unwrap_or((offset + i + 1) as i64);
            let timestamp = non_empty_text(cell(row, timestamp_idx).as_ref())
                .unwrap_or_else(|| Utc::now().to_rfc3339());
            let amount = cell_f64(cell(row, amount_idx).as_ref()).unwrap_or(0.0);
            let description = non_empty_text(cell(row, description_idx).as_ref())
                .unwrap_or_else(|| format!("Transaction {id}"));
            let category = non_empty_text(cell(row, category_idx).as_ref())
                .unwrap_or_else(|| "Uncategorized".to_string());
            let payment_method = non_empty_text(cell(row, payment_idx).as_ref())
                .unwrap_or_else(|| "Unknown".to_string());

            Transaction {
                id,
                timestamp,
                amount,
                description,
                category,
                payment_method,
            }
        })
        .collect()
}

impl Session {
    /// Aggregate statistics for one table. The row count is exact; the
    /// amount, date-range, and category aggregates run against guessed
    /// columns and independently fall back to defaults on any failure.
    pub fn table_stats(&self, table_name: &str) -> Result<TableStats, SqlViewError> {
        let info = self.table_info(table_name)?;
        let names: Vec<String> = info.columns.iter().map(|c| c.name.clone()).collect();
        let roles = classify_columns(&names);

        let total_transactions = info.row_count;

        let amount_col = roles.amount_column();
        let sql = format!(
            "SELECT SUM([{amount_col}]) FROM [{table_name}] WHERE [{amount_col}] IS NOT NULL"
        );
        let total_amount = match self
            .connection()
            .query_row(&sql, [], |row| row.get::<_, Option<f64>>(0))
        {
            Ok(sum) => sum.unwrap_or(0.0),
            Err(e) => {
                tracing::debug!(table = table_name, column = amount_col, error = %e, "amount aggregate failed");
                0.0
            }
        };

        let date_col = roles.date_column();
        let sql = format!(
            "SELECT MIN([{date_col}]), MAX([{date_col}]) FROM [{table_name}] WHERE [{date_col}] IS NOT NULL"
        );
        let date_range = match self.connection().query_row(&sql, [], |row| {
            Ok((
                cell_text(&value_ref_to_json(row.get_ref(0)?)),
                cell_text(&value_ref_to_json(row.get_ref(1)?)),
            ))
        }) {
            Ok((start, end)) => DateRange { start, end },
            Err(e) => {
                tracing::debug!(table = table_name, column = date_col, error = %e, "date aggregate failed");
                DateRange::default()
            }
        };

        let category_col = roles.category_column();
        let sql = format!(
            "SELECT DISTINCT [{category_col}] FROM [{table_name}] \
             WHERE [{category_col}] IS NOT NULL ORDER BY [{category_col}] LIMIT {CATEGORY_LIMIT}"
        );
        let categories = match self.connection().prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([], |row| Ok(cell_text(&value_ref_to_json(row.get_ref(0)?))))?
                .collect::<Result<Vec<String>, _>>()
        }) {
            Ok(values) => values,
            Err(e) => {
                tracing::debug!(table = table_name, column = category_col, error = %e, "category aggregate failed");
                Vec::new()
            }
        };

        Ok(TableStats {
            total_transactions,
            total_amount,
            date_range,
            categories,
        })
    }

    /// Paginated transaction records mapped from the table's raw rows.
    pub fn transactions(
        &self,
        table_name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>, SqlViewError> {
        let snapshot = self.raw_rows(table_name, limit, offset)?;
        Ok(map_transactions(&snapshot, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir, setup: &str) -> Session {
        let path = dir.path().join("test.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(setup).unwrap();
        drop(conn);
        Session::open(&path.display().to_string()).unwrap()
    }

    #[test]
    fn stats_for_sales_table() {
        let dir = TempDir::new().unwrap();
        let session = open_db(
            &dir,
            "CREATE TABLE sales (id INTEGER PRIMARY KEY, item_name TEXT, total REAL, sold_at TEXT);
             INSERT INTO sales VALUES
                (1, 'A', 10, '2024-01-01'),
                (2, 'B', 20, '2024-01-02'),
                (3, 'C', 30, NULL);",
        );

        let stats = session.table_stats("sales").unwrap();
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(stats.total_amount, 60.0);
        assert_eq!(stats.date_range.start, "2024-01-01");
        assert_eq!(stats.date_range.end, "2024-01-02");
        assert!(stats.categories.is_empty());
    }

    #[test]
    fn stats_default_when_no_column_matches() {
        let dir = TempDir::new().unwrap();
        let session = open_db(
            &dir,
            "CREATE TABLE plain (pk INTEGER PRIMARY KEY, label TEXT);
             INSERT INTO plain VALUES (1, 'x'), (2, 'y');",
        );

        let stats = session.table_stats("plain").unwrap();
        assert_eq!(stats.total_transactions, 2);
        assert_eq!(stats.total_amount, 0.0);
        assert_eq!(stats.date_range, DateRange::default());
        assert!(stats.categories.is_empty());
    }

    #[test]
    fn categories_are_distinct_sorted_and_capped() {
        let dir = TempDir::new().unwrap();
        let mut setup = String::from("CREATE TABLE items (id INTEGER, kind TEXT);");
        for i in 0..60 {
            setup.push_str(&format!(
                "INSERT INTO items VALUES ({i}, 'kind{i:02}');
                 INSERT INTO items VALUES ({i}, 'kind{i:02}');"
            ));
        }
        setup.push_str("INSERT INTO items VALUES (99, NULL);");
        let session = open_db(&dir, &setup);

        let stats = session.table_stats("items").unwrap();
        assert_eq!(stats.categories.len(), CATEGORY_LIMIT);
        assert_eq!(stats.categories[0], "kind00");
        assert_eq!(stats.categories[49], "kind49");
    }

    #[test]
    fn amount_sum_skips_nulls() {
        let dir = TempDir::new().unwrap();
        let session = open_db(
            &dir,
            "CREATE TABLE orders (id INTEGER, price REAL);
             INSERT INTO orders VALUES (1, 2.5), (2, NULL), (3, 7.5);",
        );

        let stats = session.table_stats("orders").unwrap();
        assert_eq!(stats.total_amount, 10.0);
    }

    #[test]
    fn transactions_map_recognized_columns() {
        let dir = TempDir::new().unwrap();
        let session = open_db(
            &dir,
            "CREATE TABLE sales (id INTEGER, created_at TEXT, total REAL, name TEXT, type TEXT, payment_method TEXT);
             INSERT INTO sales VALUES (7, '2024-03-01', 12.5, 'Coffee', 'Drinks', 'Cash');",
        );

        let records = session.transactions("sales", 50, 0).unwrap();
        assert_eq!(records.len(), 1);
        let tx = &records[0];
        assert_eq!(tx.id, 7);
        assert_eq!(tx.timestamp, "2024-03-01");
        assert_eq!(tx.amount, 12.5);
        assert_eq!(tx.description, "Coffee");
        assert_eq!(tx.category, "Drinks");
        assert_eq!(tx.payment_method, "Cash");
    }

    #[test]
    fn transactions_fall_back_to_defaults() {
        let snapshot = TableSnapshot {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![Value::Null, Value::Null]],
        };
        let records = map_transactions(&snapshot, 10);
        let tx = &records[0];
        assert_eq!(tx.id, 11);
        assert_eq!(tx.amount, 0.0);
        assert_eq!(tx.description, "Transaction 11");
        assert_eq!(tx.category, "Uncategorized");
        assert_eq!(tx.payment_method, "Unknown");
        assert!(!tx.timestamp.is_empty());
    }

    #[test]
    fn transaction_amount_parses_text_values() {
        let snapshot = TableSnapshot {
            columns: vec!["amount".into()],
            rows: vec![
                vec![Value::String("12.50".into())],
                vec![Value::String("n/a".into())],
            ],
        };
        let records = map_transactions(&snapshot, 0);
        assert_eq!(records[0].amount, 12.5);
        assert_eq!(records[1].amount, 0.0);
    }
}
