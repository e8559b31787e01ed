// src/store/mod.rs

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use crate::rewrite::target::TableName;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Primary key of a row in its canonical text form, so integer and UUID keys
/// are handled the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(pub String);

impl RowKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey(s.to_string())
    }
}

impl From<String> for RowKey {
    fn from(s: String) -> Self {
        RowKey(s)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot row restricted to the requested columns. `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: RowKey,
    pub values: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Backend type name, used to cast text back on update.
    pub type_name: String,
    pub is_text: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: TableName,
    pub primary_key: ColumnInfo,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A new value for one column of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChange {
    pub column: String,
    pub value: String,
}

/// A tabular store that can read a whole table and update single rows by
/// primary key. The rewriter owns its store exclusively for a run.
#[async_trait]
pub trait TableStore: Send {
    /// Look up a table's primary key and columns.
    async fn describe(&mut self, table: &TableName) -> Result<TableSchema, StoreError>;

    /// Read every row of the table, returning the key and the given columns.
    async fn fetch_all(
        &mut self,
        schema: &TableSchema,
        columns: &[String],
    ) -> Result<Vec<Row>, StoreError>;

    /// Write only the given columns of the row with `key`.
    async fn update(
        &mut self,
        schema: &TableSchema,
        key: &RowKey,
        changes: &[ColumnChange],
    ) -> Result<(), StoreError>;

    /// Release the underlying connection. Further calls fail with
    /// [`StoreError::Closed`].
    async fn close(&mut self) -> Result<(), StoreError>;
}
