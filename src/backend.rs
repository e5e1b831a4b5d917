use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Row from a query result.
///
/// Columns keep the order the backend returned them in, which is the order
/// mapped output is produced in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
    pub columns: Map<String, Value>,
}

impl QueryRow {
    pub fn new() -> Self {
        Self {
            columns: Map::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.columns.insert(key.into(), value);
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.columns
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Look a column up by exact name, then case-insensitively.
    ///
    /// Dialects differ in how they fold unquoted identifiers, so callers that
    /// only know the name they projected use this.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.columns.get(key).or_else(|| {
            self.columns
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.value(key).and_then(|v| v.as_str().map(String::from))
    }

    /// Integer column; numeric strings are accepted since DB2 drivers often
    /// return aggregates and decimals as text.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(|v| v.as_bool())
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.columns
    }
}

impl From<Map<String, Value>> for QueryRow {
    fn from(columns: Map<String, Value>) -> Self {
        Self { columns }
    }
}

/// Result of a query
pub type QueryResult = Vec<QueryRow>;

/// Database backend trait.
///
/// The mapping layer renders SQL with the builders in [`crate::builder`] and
/// hands it to a backend; it never talks to a driver directly.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Execute a SQL statement (no results), returning the affected row count
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Query and return results
    async fn query(&mut self, sql: &str) -> Result<QueryResult>;

    /// Check if connected
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_falls_back_to_case_insensitive_lookup() {
        let mut row = QueryRow::new();
        row.insert("ICITEM", json!("A100"));
        row.insert("AGGREGATE", json!("12"));

        assert_eq!(row.get_string("icitem"), Some("A100".to_string()));
        assert_eq!(row.get_i64("aggregate"), Some(12));
        assert_eq!(row.value("missing"), None);
    }

    #[test]
    fn test_columns_keep_insertion_order() {
        let mut row = QueryRow::new();
        row.insert("Z", json!(1));
        row.insert("A", json!(2));

        let keys: Vec<&String> = row.columns.keys().collect();
        assert_eq!(keys, vec!["Z", "A"]);
    }
}
