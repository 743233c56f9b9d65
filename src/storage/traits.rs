//! Storage traits and error types
//!
//! This module defines the table-store interface and the types that flow
//! through it: column definitions, records, and select queries.

use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Record for table '{0}' has no columns")]
    EmptyRecord(String),

    #[error("No transaction is active")]
    NoActiveTransaction,

    #[error("A transaction is already active")]
    TransactionActive,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One row: column name to value
pub type Record = BTreeMap<String, Value>;

/// SQLite storage classes usable in a column definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

/// Column definition for `create_table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            not_null: false,
            unique: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

/// Select parameters: equality filters joined with AND, one sort key, paging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Record,
    pub order_by: Option<(String, Order)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality condition; `Value::Null` matches NULL
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(column.into(), value.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Trait for table-store backends
///
/// Table and column names are caller-chosen; implementations must reject
/// anything that is not a plain identifier with
/// [`StorageError::InvalidIdentifier`]. Values are always bound, never
/// interpolated.
pub trait Storage {
    // ===== Schema =====

    /// Creates a table if it does not exist yet
    fn create_table(&mut self, table: &str, columns: &[Column]) -> StorageResult<()>;

    // ===== Writes =====

    /// Inserts one record and returns its rowid
    fn insert(&mut self, table: &str, record: &Record) -> StorageResult<i64>;

    /// Inserts many records atomically and returns how many were written
    ///
    /// Runs inside its own transaction unless one is already active.
    fn bulk_insert(&mut self, table: &str, records: &[Record]) -> StorageResult<usize>;

    /// Sets `values` on every row matching `filter`; returns the rows affected
    fn update(&mut self, table: &str, values: &Record, filter: &Record) -> StorageResult<usize>;

    /// Deletes every row matching `filter`; returns the rows affected
    ///
    /// An empty filter deletes all rows.
    fn delete(&mut self, table: &str, filter: &Record) -> StorageResult<usize>;

    // ===== Reads =====

    /// Selects rows matching `query`
    fn select(&self, table: &str, query: &Query) -> StorageResult<Vec<Record>>;

    /// Counts rows matching `filter`
    fn count(&self, table: &str, filter: &Record) -> StorageResult<u64>;

    // ===== Transactions =====

    fn begin(&mut self) -> StorageResult<()>;

    fn commit(&mut self) -> StorageResult<()>;

    fn rollback(&mut self) -> StorageResult<()>;

    /// Returns true while an explicit transaction is open
    fn in_transaction(&self) -> bool;
}
