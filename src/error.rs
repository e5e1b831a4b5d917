use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Entity not registered: {0}")]
    EntityNotRegistered(String),

    #[error("Relation '{relation}' is not defined on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl QueryError {
    /// Shorthand for a relation definition problem detected while building a schema.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        QueryError::Config(msg.into())
    }
}
