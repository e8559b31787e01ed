// src/store/memory.rs

use crate::error::StoreError;
use crate::rewrite::target::TableName;
use crate::store::{ColumnChange, ColumnInfo, Row, RowKey, TableSchema, TableStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone)]
struct MemTable {
    primary_key: String,
    columns: Vec<ColumnInfo>,
    rows: BTreeMap<RowKey, HashMap<String, Option<String>>>,
}

/// A write that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub table: String,
    pub key: RowKey,
    pub changes: Vec<ColumnChange>,
}

/// In-process table store. Tables are keyed by their unqualified name.
///
/// Reads and updates can be made to fail on demand, a row can be made to
/// vanish between the snapshot and its update, and every successful update
/// is recorded in [`MemoryStore::writes`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<String, MemTable>,
    failing_reads: HashSet<String>,
    failing_updates: HashSet<(String, RowKey)>,
    vanishing_rows: HashSet<(String, RowKey)>,
    writes: Vec<WriteRecord>,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table whose primary key and listed columns are all text.
    pub fn create_table(&mut self, table: &str, primary_key: &str, columns: &[&str]) {
        let mut infos = vec![ColumnInfo {
            name: primary_key.to_string(),
            type_name: "int8".into(),
            is_text: false,
        }];
        infos.extend(columns.iter().map(|c| ColumnInfo {
            name: c.to_string(),
            type_name: "text".into(),
            is_text: true,
        }));
        self.tables.insert(
            table.to_string(),
            MemTable {
                primary_key: primary_key.to_string(),
                columns: infos,
                rows: BTreeMap::new(),
            },
        );
    }

    /// Add a non-text column, e.g. a timestamp.
    pub fn add_column(&mut self, table: &str, column: &str, type_name: &str) {
        if let Some(t) = self.tables.get_mut(table) {
            t.columns.push(ColumnInfo {
                name: column.to_string(),
                type_name: type_name.to_string(),
                is_text: false,
            });
        }
    }

    pub fn insert(&mut self, table: &str, key: &str, values: &[(&str, Option<&str>)]) {
        if let Some(t) = self.tables.get_mut(table) {
            let row = values
                .iter()
                .map(|(c, v)| (c.to_string(), v.map(str::to_string)))
                .collect();
            t.rows.insert(RowKey::from(key), row);
        }
    }

    pub fn remove(&mut self, table: &str, key: &str) {
        if let Some(t) = self.tables.get_mut(table) {
            t.rows.remove(&RowKey::from(key));
        }
    }

    pub fn get(&self, table: &str, key: &str, column: &str) -> Option<&str> {
        self.tables
            .get(table)?
            .rows
            .get(&RowKey::from(key))?
            .get(column)?
            .as_deref()
    }

    pub fn fail_reads(&mut self, table: &str) {
        self.failing_reads.insert(table.to_string());
    }

    pub fn fail_update(&mut self, table: &str, key: &str) {
        self.failing_updates
            .insert((table.to_string(), RowKey::from(key)));
    }

    /// Delete the row when its update arrives, as if another writer removed
    /// it after the snapshot was taken.
    pub fn delete_before_update(&mut self, table: &str, key: &str) {
        self.vanishing_rows
            .insert((table.to_string(), RowKey::from(key)));
    }

    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn table(&self, name: &TableName) -> Result<&MemTable, StoreError> {
        self.tables
            .get(&name.name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn describe(&mut self, table: &TableName) -> Result<TableSchema, StoreError> {
        self.ensure_open()?;
        let t = self.table(table)?;
        let primary_key = t
            .columns
            .iter()
            .find(|c| c.name == t.primary_key)
            .cloned()
            .ok_or_else(|| StoreError::PrimaryKey {
                table: table.to_string(),
                found: 0,
            })?;
        Ok(TableSchema {
            table: table.clone(),
            primary_key,
            columns: t.columns.clone(),
        })
    }

    async fn fetch_all(
        &mut self,
        schema: &TableSchema,
        columns: &[String],
    ) -> Result<Vec<Row>, StoreError> {
        self.ensure_open()?;
        if self.failing_reads.contains(&schema.table.name) {
            return Err(StoreError::Backend(format!(
                "read of {} refused",
                schema.table
            )));
        }
        let t = self.table(&schema.table)?;
        Ok(t.rows
            .iter()
            .map(|(key, row)| Row {
                key: key.clone(),
                values: columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().flatten()))
                    .collect(),
            })
            .collect())
    }

    async fn update(
        &mut self,
        schema: &TableSchema,
        key: &RowKey,
        changes: &[ColumnChange],
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let name = schema.table.name.clone();
        if self.failing_updates.contains(&(name.clone(), key.clone())) {
            return Err(StoreError::Backend(format!(
                "update of {} key {} refused",
                schema.table, key
            )));
        }
        if self.vanishing_rows.remove(&(name.clone(), key.clone())) {
            if let Some(t) = self.tables.get_mut(&name) {
                t.rows.remove(key);
            }
        }
        let row = self
            .tables
            .get_mut(&name)
            .ok_or_else(|| StoreError::TableNotFound(schema.table.to_string()))?
            .rows
            .get_mut(key)
            .ok_or_else(|| StoreError::RowMissing {
                table: schema.table.to_string(),
                key: key.to_string(),
            })?;
        for change in changes {
            row.insert(change.column.clone(), Some(change.value.clone()));
        }
        self.writes.push(WriteRecord {
            table: name,
            key: key.clone(),
            changes: changes.to_vec(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        Ok(())
    }
}
