//! mapped-query - human-readable names over legacy DB2 tables
//!
//! mapped-query sits on top of a small SQL builder and lets applications talk
//! to cryptic legacy tables (`ICITEM`, `CTDEPT`, ...) through human names,
//! while the database keeps its original layout.
//!
//! # Architecture
//!
//! - **Name maps**: every entity type maps raw columns to human names; query
//!   arguments are translated on the way in, results on the way out
//! - **Composite-key relations**: belongs-to, has-one/many and through
//!   relations keyed on ordered column lists, eager-loaded in one query per
//!   relation as an OR of AND groups
//! - **Extension tables**: auxiliary tables left-joined onto a base table,
//!   contributing their own mapped columns
//! - **Global scopes**: active-record and company filters plus mapped-column
//!   projection, each removable per query
//! - **Backend abstraction**: queries render SQL and hand it to a
//!   [`DatabaseBackend`]
//!
//! # Example
//!
//! ```rust,no_run
//! use mapped_query::prelude::*;
//!
//! # async fn run(backend: &mut dyn DatabaseBackend) -> Result<()> {
//! let schema = Schema::builder()
//!     .entity(EntityType::new("department", "test_departments").maps(NameMap::from_iter([
//!         ("DPCODE", "code"),
//!         ("DPCOMP", "company_number"),
//!         ("DPDLTC", "delete_code"),
//!     ])))
//!     .entity(EntityType::new("category", "test_categories").maps(NameMap::from_iter([
//!         ("CTCODE", "code"),
//!         ("CTDEPT", "department_code"),
//!         ("CTCOMP", "company_number"),
//!     ])))
//!     .relation(
//!         RelationDef::has_many(
//!             "department",
//!             "categories",
//!             "category",
//!             ["department_code", "company_number"],
//!         )
//!         .local_key(["code", "company_number"]),
//!     )
//!     .build()?;
//!
//! let departments = schema
//!     .query("department")?
//!     .where_eq("code", "ELEC")
//!     .with("categories")
//!     .get(backend)
//!     .await?;
//!
//! for department in &departments {
//!     println!("{}", department.to_json());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Backend Support
//!
//! A SQLite backend is available behind a Cargo feature:
//!
//! ```toml
//! [dependencies]
//! mapped-query = { version = "0.1", features = ["sqlite"] }
//! ```

pub mod backend;
pub mod builder;
pub mod cast;
pub mod config;
pub mod entity;
pub mod error;
pub mod extension;
pub mod mapping;
pub mod query;
pub mod relation;
pub mod schema;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::{DatabaseBackend, QueryResult, QueryRow};
pub use builder::{
    AggregateFunc, ComparisonOp, Condition, DeleteBuilder, Expr, InsertBuilder, JoinType,
    LogicalOp, Projection, SelectBuilder, SortDirection, UpdateBuilder,
};
pub use cast::{Cast, IntegerCast};
pub use config::{EntityConfig, EntityOptions, SchemaConfig};
pub use entity::{Entity, EntityType, Related};
pub use error::{QueryError, Result};
pub use extension::{Extension, ExtensionComposer};
pub use mapping::{ColumnMapper, NameMap, NameMapper};
pub use query::{AliasTable, Constraint, GlobalScope, MappedQuery};
pub use relation::{CompositeKey, Keys, RelationDef, RelationKind, RelationResolver};
pub use schema::{Schema, SchemaBuilder};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
    pub use crate::builder::{ComparisonOp, Condition, Expr, SortDirection};
    pub use crate::config::EntityOptions;
    pub use crate::entity::{Entity, EntityType, Related};
    pub use crate::error::{QueryError, Result};
    pub use crate::extension::{Extension, ExtensionComposer};
    pub use crate::mapping::{NameMap, NameMapper};
    pub use crate::query::{GlobalScope, MappedQuery};
    pub use crate::relation::RelationDef;
    pub use crate::schema::{Schema, SchemaBuilder};

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::SqliteBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _schema = SchemaBuilder::new();
        let _map = NameMap::new();
        let _comp_op = ComparisonOp::Eq;
        let _log_op = LogicalOp::And;
        let _scope = GlobalScope::Active;
    }
}
