// src/store/postgres.rs

use crate::config::DbConfig;
use crate::error::StoreError;
use crate::rewrite::target::{is_identifier, TableName};
use crate::store::{ColumnChange, ColumnInfo, Row, RowKey, TableSchema, TableStore};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row as _};
use std::collections::HashMap;
use tracing::{debug, info};

/// `udt_name`s whose values round-trip through `::text` unchanged.
const TEXT_TYPES: &[&str] = &["text", "varchar", "bpchar", "json", "jsonb", "citext"];

/// A single PostgreSQL connection. All SQL is built at runtime from validated
/// identifiers; values are always bound.
pub struct PgStore {
    conn: Option<PgConnection>,
}

impl PgStore {
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let opts = config.connect_options()?;
        let conn = PgConnection::connect_with(&opts).await?;
        let (host, port, database) = endpoint(&opts);
        info!(host, port, database, "connected");
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.conn.as_mut().ok_or(StoreError::Closed)
    }
}

/// Where the options actually point, whether they came from `DB_*`
/// variables or `DATABASE_URL`.
fn endpoint(opts: &PgConnectOptions) -> (&str, u16, &str) {
    (
        opts.get_host(),
        opts.get_port(),
        opts.get_database().unwrap_or_default(),
    )
}

/// Double-quote an identifier. Callers only pass names that already matched
/// the identifier pattern or came back from the catalog.
fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified(table: &TableName) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote(schema), quote(&table.name)),
        None => quote(&table.name),
    }
}

/// `$n::type` when the type name is safe to splice in, plain `$n` otherwise.
fn cast_param(n: usize, type_name: &str) -> String {
    if is_identifier(type_name) {
        format!("${}::{}", n, type_name)
    } else {
        format!("${}", n)
    }
}

fn select_sql(schema: &TableSchema, columns: &[String]) -> String {
    let pk = quote(&schema.primary_key.name);
    let mut fields = vec![format!("{}::text", pk)];
    fields.extend(columns.iter().map(|c| format!("{}::text", quote(c))));
    format!(
        "SELECT {} FROM {} ORDER BY {}",
        fields.join(", "),
        qualified(&schema.table),
        pk
    )
}

fn update_sql(schema: &TableSchema, changes: &[ColumnChange]) -> String {
    let sets = changes
        .iter()
        .enumerate()
        .map(|(i, change)| {
            let ty = schema
                .column(&change.column)
                .map(|c| c.type_name.as_str())
                .unwrap_or("text");
            format!("{} = {}", quote(&change.column), cast_param(i + 1, ty))
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {} = {}",
        qualified(&schema.table),
        sets,
        quote(&schema.primary_key.name),
        cast_param(changes.len() + 1, &schema.primary_key.type_name)
    )
}

#[async_trait]
impl TableStore for PgStore {
    async fn describe(&mut self, table: &TableName) -> Result<TableSchema, StoreError> {
        let conn = self.conn()?;

        let rows = sqlx::query(
            r#"
            SELECT column_name::text, udt_name::text
            FROM information_schema.columns
            WHERE table_schema::text = COALESCE($1::text, current_schema()::text)
              AND table_name::text = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(table.schema.as_deref())
        .bind(&table.name)
        .fetch_all(&mut *conn)
        .await?;

        if rows.is_empty() {
            return Err(StoreError::TableNotFound(table.to_string()));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let type_name: String = row.try_get(1)?;
            let is_text = TEXT_TYPES.contains(&type_name.as_str());
            columns.push(ColumnInfo {
                name,
                type_name,
                is_text,
            });
        }

        let pk_rows = sqlx::query(
            r#"
            SELECT kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_schema::text = COALESCE($1::text, current_schema()::text)
              AND tc.table_name::text = $2
            "#,
        )
        .bind(table.schema.as_deref())
        .bind(&table.name)
        .fetch_all(&mut *conn)
        .await?;

        if pk_rows.len() != 1 {
            return Err(StoreError::PrimaryKey {
                table: table.to_string(),
                found: pk_rows.len(),
            });
        }
        let pk_name: String = pk_rows[0].try_get(0)?;
        let primary_key = columns
            .iter()
            .find(|c| c.name == pk_name)
            .cloned()
            .ok_or_else(|| StoreError::ColumnNotFound {
                table: table.to_string(),
                column: pk_name.clone(),
            })?;

        debug!(table = %table, pk = %primary_key.name, columns = columns.len(), "described table");
        Ok(TableSchema {
            table: table.clone(),
            primary_key,
            columns,
        })
    }

    async fn fetch_all(
        &mut self,
        schema: &TableSchema,
        columns: &[String],
    ) -> Result<Vec<Row>, StoreError> {
        let sql = select_sql(schema, columns);
        let conn = self.conn()?;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get(0)?;
            let mut values = HashMap::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let value: Option<String> = row.try_get(i + 1)?;
                values.insert(column.clone(), value);
            }
            out.push(Row {
                key: RowKey(key),
                values,
            });
        }
        Ok(out)
    }

    async fn update(
        &mut self,
        schema: &TableSchema,
        key: &RowKey,
        changes: &[ColumnChange],
    ) -> Result<(), StoreError> {
        let sql = update_sql(schema, changes);
        let conn = self.conn()?;

        let mut query = sqlx::query(&sql);
        for change in changes {
            query = query.bind(change.value.as_str());
        }
        let result = query.bind(key.as_str()).execute(&mut *conn).await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowMissing {
                table: schema.table.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        match self.conn.take() {
            Some(conn) => {
                conn.close().await?;
                debug!("connection closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}
