use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, ValueRef};
use std::fmt::Write;
use std::str::FromStr;

/// SQLite backend over an sqlx pool.
///
/// Useful for local development and tests against copies of legacy tables;
/// DB2-only syntax such as `FETCH FIRST` in updates should be switched off
/// through the entity options when targeting it.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_max_connections(url, 5).await
    }

    /// In-memory database. Every pooled connection would open its own empty
    /// database, so the pool holds a single connection.
    pub async fn memory() -> Result<Self> {
        Self::with_max_connections("sqlite::memory:", 1).await
    }

    pub async fn file(path: &str) -> Result<Self> {
        Self::new(&format!("sqlite://{}", path)).await
    }

    async fn with_max_connections(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        log::debug!("Connected to SQLite at {}", url);
        Ok(Self { pool })
    }

    /// Convert a SQLite row, keeping column order
    fn convert_row(row: &SqliteRow) -> QueryRow {
        let mut query_row = QueryRow::new();

        for (index, column) in row.columns().iter().enumerate() {
            let name = column.name();
            let is_null = row
                .try_get_raw(index)
                .map(|raw| raw.is_null())
                .unwrap_or(true);

            let value = if is_null {
                Value::Null
            } else if let Ok(value) = row.try_get::<i64, _>(index) {
                Value::Number(value.into())
            } else if let Ok(value) = row.try_get::<f64, _>(index) {
                serde_json::Number::from_f64(value)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<String, _>(index) {
                Value::String(value)
            } else if let Ok(value) = row.try_get::<Vec<u8>, _>(index) {
                Value::String(hex_encode(&value))
            } else {
                Value::Null
            };
            query_row.insert(name.to_string(), value);
        }

        query_row
    }

    /// Names of user tables
    pub async fn list_tables(&mut self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        log::trace!("sqlite execute: {}", sql);
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        log::trace!("sqlite query: {}", sql);
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::convert_row).collect())
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }
}

/// Upper-case hex, the way DB2 prints binary columns
fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02X}", byte);
    }
    out
}
