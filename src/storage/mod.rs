//! Storage module for persisting fetched content
//!
//! This module provides a small table store over SQLite:
//! - Table creation from column definitions
//! - Insert, bulk insert, update, delete and filtered selects
//! - Explicit transactions
//! - Helpers for the `items` table the CLI writes into

mod schema;
mod sqlite;
mod traits;

pub use schema::{items_columns, validate_identifier, ITEMS_TABLE};
pub use sqlite::SqliteStorage;
pub use traits::{Column, ColumnType, Order, Query, Record, Storage, StorageError, StorageResult};

use chrono::Utc;
use rusqlite::types::Value;
use std::path::Path;

/// Opens a storage database and makes sure the items table exists
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(RippleError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> crate::Result<SqliteStorage> {
    let mut storage = SqliteStorage::new(path)?;
    ensure_items_table(&mut storage)?;
    Ok(storage)
}

/// Creates the items table if it does not exist
pub fn ensure_items_table<S: Storage + ?Sized>(storage: &mut S) -> StorageResult<()> {
    storage.create_table(ITEMS_TABLE, &items_columns())
}

/// Stores one fetched item, stamped with the current UTC time
pub fn record_item<S: Storage + ?Sized>(
    storage: &mut S,
    url: &str,
    content: &str,
) -> StorageResult<i64> {
    let mut record = Record::new();
    record.insert("url".to_string(), Value::Text(url.to_string()));
    record.insert("content".to_string(), Value::Text(content.to_string()));
    record.insert(
        "fetched_at".to_string(),
        Value::Text(Utc::now().to_rfc3339()),
    );
    storage.insert(ITEMS_TABLE, &record)
}
