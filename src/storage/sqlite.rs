//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::{column_definition, quoted};
use crate::storage::traits::{Column, Query, Record, Storage, StorageError, StorageResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates a database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    fn insert_with(conn: &Connection, table: &str, record: &Record) -> StorageResult<i64> {
        if record.is_empty() {
            return Err(StorageError::EmptyRecord(table.to_string()));
        }

        let columns = record
            .keys()
            .map(|name| quoted(name))
            .collect::<StorageResult<Vec<_>>>()?;
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted(table)?,
            columns.join(", "),
            placeholders.join(", ")
        );
        conn.execute(&sql, params_from_iter(record.values()))?;
        Ok(conn.last_insert_rowid())
    }
}

/// Builds a `WHERE` clause whose placeholders start at `?{first}`
///
/// Returns the clause (empty when there is no filter) and the values to bind.
fn where_clause(filter: &Record, first: usize) -> StorageResult<(String, Vec<&Value>)> {
    if filter.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut conditions = Vec::with_capacity(filter.len());
    let mut values = Vec::with_capacity(filter.len());
    for (column, value) in filter {
        let column = quoted(column)?;
        if matches!(value, Value::Null) {
            conditions.push(format!("{} IS NULL", column));
        } else {
            values.push(value);
            conditions.push(format!("{} = ?{}", column, first + values.len() - 1));
        }
    }

    Ok((format!(" WHERE {}", conditions.join(" AND ")), values))
}

impl Storage for SqliteStorage {
    // ===== Schema =====

    fn create_table(&mut self, table: &str, columns: &[Column]) -> StorageResult<()> {
        if columns.is_empty() {
            return Err(StorageError::EmptyRecord(table.to_string()));
        }

        let definitions = columns
            .iter()
            .map(column_definition)
            .collect::<StorageResult<Vec<_>>>()?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quoted(table)?,
            definitions.join(", ")
        );
        self.conn.execute_batch(&sql)?;
        tracing::debug!("Ensured table {}", table);
        Ok(())
    }

    // ===== Writes =====

    fn insert(&mut self, table: &str, record: &Record) -> StorageResult<i64> {
        Self::insert_with(&self.conn, table, record)
    }

    fn bulk_insert(&mut self, table: &str, records: &[Record]) -> StorageResult<usize> {
        if !self.conn.is_autocommit() {
            for record in records {
                Self::insert_with(&self.conn, table, record)?;
            }
            return Ok(records.len());
        }

        let tx = self.conn.transaction()?;
        for record in records {
            Self::insert_with(&tx, table, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn update(&mut self, table: &str, values: &Record, filter: &Record) -> StorageResult<usize> {
        if values.is_empty() {
            return Err(StorageError::EmptyRecord(table.to_string()));
        }

        let assignments = values
            .keys()
            .enumerate()
            .map(|(i, name)| Ok(format!("{} = ?{}", quoted(name)?, i + 1)))
            .collect::<StorageResult<Vec<_>>>()?;
        let (clause, filter_values) = where_clause(filter, values.len() + 1)?;

        let sql = format!(
            "UPDATE {} SET {}{}",
            quoted(table)?,
            assignments.join(", "),
            clause
        );
        let params = values.values().chain(filter_values);
        Ok(self.conn.execute(&sql, params_from_iter(params))?)
    }

    fn delete(&mut self, table: &str, filter: &Record) -> StorageResult<usize> {
        let (clause, values) = where_clause(filter, 1)?;
        let sql = format!("DELETE FROM {}{}", quoted(table)?, clause);
        Ok(self.conn.execute(&sql, params_from_iter(values))?)
    }

    // ===== Reads =====

    fn select(&self, table: &str, query: &Query) -> StorageResult<Vec<Record>> {
        let (clause, values) = where_clause(&query.filter, 1)?;
        let mut sql = format!("SELECT * FROM {}{}", quoted(table)?, clause);

        if let Some((column, order)) = &query.order_by {
            sql.push_str(&format!(" ORDER BY {} {}", quoted(column)?, order));
        }
        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                let mut record = Record::new();
                for (i, name) in names.iter().enumerate() {
                    record.insert(name.clone(), row.get::<_, Value>(i)?);
                }
                Ok(record)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn count(&self, table: &str, filter: &Record) -> StorageResult<u64> {
        let (clause, values) = where_clause(filter, 1)?;
        let sql = format!("SELECT COUNT(*) FROM {}{}", quoted(table)?, clause);
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Transactions =====

    fn begin(&mut self) -> StorageResult<()> {
        if self.in_transaction() {
            return Err(StorageError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        if !self.in_transaction() {
            return Err(StorageError::NoActiveTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        if !self.in_transaction() {
            return Err(StorageError::NoActiveTransaction);
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}
