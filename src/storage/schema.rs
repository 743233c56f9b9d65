//! Identifier checks and the fetched-items table
//!
//! Table and column names cannot be bound as parameters, so every name that
//! reaches generated SQL passes through [`validate_identifier`] first.

use crate::storage::traits::{Column, ColumnType, StorageError, StorageResult};

/// Table the CLI writes fetched items into
pub const ITEMS_TABLE: &str = "items";

/// Column definitions for [`ITEMS_TABLE`]
pub fn items_columns() -> Vec<Column> {
    vec![
        Column::new("id", ColumnType::Integer).primary_key(),
        Column::new("url", ColumnType::Text).not_null(),
        Column::new("content", ColumnType::Text).not_null(),
        Column::new("fetched_at", ColumnType::Text).not_null(),
    ]
}

/// Checks that `name` matches `[A-Za-z_][A-Za-z0-9_]*`
pub fn validate_identifier(name: &str) -> StorageResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}

/// Validates and double-quotes an identifier
pub(crate) fn quoted(name: &str) -> StorageResult<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

/// Renders one column of a `CREATE TABLE` statement
pub(crate) fn column_definition(column: &Column) -> StorageResult<String> {
    let mut definition = format!("{} {}", quoted(&column.name)?, column.column_type.as_sql());
    if column.primary_key {
        definition.push_str(" PRIMARY KEY");
    }
    if column.not_null {
        definition.push_str(" NOT NULL");
    }
    if column.unique {
        definition.push_str(" UNIQUE");
    }
    Ok(definition)
}
