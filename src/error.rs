// src/error.rs

use thiserror::Error;

/// Failures raised by a [`TableStore`](crate::store::TableStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("table `{0}` does not exist")]
    TableNotFound(String),

    #[error("table `{table}` has no column `{column}`")]
    ColumnNotFound { table: String, column: String },

    #[error("table `{table}` must have a single-column primary key, found {found}")]
    PrimaryKey { table: String, found: usize },

    #[error("no row with key `{key}` in `{table}`")]
    RowMissing { table: String, key: String },

    #[error("connection already closed")]
    Closed,

    #[error("{0}")]
    Backend(String),
}

/// Errors that stop a rewrite before or while it runs.
///
/// Per-row update failures are not represented here: they are recorded in
/// the [`RunReport`](crate::rewrite::RunReport) and the pass continues.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("cannot connect to database: {0}")]
    Connection(#[source] StoreError),

    #[error("cannot read snapshot of `{table}`: {source}")]
    Read {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("invalid target `{table}`: {reason}")]
    InvalidTarget { table: String, reason: String },

    #[error("invalid rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl RewriteError {
    pub fn invalid_target(table: impl Into<String>, reason: impl Into<String>) -> Self {
        RewriteError::InvalidTarget {
            table: table.into(),
            reason: reason.into(),
        }
    }
}
