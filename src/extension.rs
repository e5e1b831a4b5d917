//! Extension tables.
//!
//! Legacy schemas often keep extra attributes of a base row in an auxiliary
//! table sharing its key (`VINITEMX` next to `VINITEM`). An [`Extension`]
//! describes how to join one, which columns to project, and how they are
//! named. [`ExtensionComposer`] adds the joins to a query; the record helpers
//! on [`Entity`] look rows up for a single entity.

use crate::backend::{DatabaseBackend, QueryRow};
use crate::builder::{AggregateFunc, ComparisonOp, Condition, Expr, SelectBuilder};
use crate::entity::Entity;
use crate::error::Result;
use crate::mapping::NameMap;
use crate::query::MappedQuery;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Auxiliary table joined to an entity's base table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub table: String,
    /// `(extension column, base column)` pairs, ANDed in the join
    #[serde(
        default,
        serialize_with = "serialize_join",
        deserialize_with = "deserialize_join"
    )]
    pub join: Vec<(String, String)>,
    /// Projected columns; `None` or `["*"]` selects every column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub maps: NameMap,
}

impl Extension {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            join: Vec::new(),
            columns: None,
            maps: NameMap::new(),
        }
    }

    pub fn join_on(mut self, extension_column: impl Into<String>, base_column: impl Into<String>) -> Self {
        self.join.push((extension_column.into(), base_column.into()));
        self
    }

    pub fn with_columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    pub fn map(mut self, raw: impl Into<String>, human: impl Into<String>) -> Self {
        self.maps.insert(raw, human);
        self
    }

    pub fn maps(mut self, maps: NameMap) -> Self {
        self.maps = maps;
        self
    }

    pub fn is_wildcard(&self) -> bool {
        match &self.columns {
            None => true,
            Some(columns) => columns.len() == 1 && columns[0] == "*",
        }
    }

    fn qualify(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }

    /// `ext.aux = base.col` for every join pair
    pub fn join_condition(&self, base_table: &str) -> Condition {
        let mut conditions: Vec<Condition> = self
            .join
            .iter()
            .map(|(aux, base)| {
                Condition::columns_eq(self.qualify(aux), format!("{}.{}", base_table, base))
            })
            .collect();
        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::all(conditions)
        }
    }

    /// Rows of this extension belonging to `entity`
    fn rows_for(&self, entity: &Entity) -> SelectBuilder {
        let conditions = self
            .join
            .iter()
            .map(|(aux, base)| match entity.get_raw(base) {
                Some(value) if !value.is_null() => Condition::eq(aux.as_str(), value.clone()),
                _ => Condition::is_null(aux.as_str()),
            })
            .collect();
        SelectBuilder::new(self.table.as_str()).where_clause(Condition::all(conditions))
    }
}

#[allow(clippy::ptr_arg)]
fn serialize_join<S: Serializer>(join: &Vec<(String, String)>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(join.len()))?;
    for (aux, base) in join {
        map.serialize_entry(aux, base)?;
    }
    map.end()
}

fn deserialize_join<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<(String, String)>, D::Error> {
    struct JoinVisitor;

    impl<'de> Visitor<'de> for JoinVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of extension columns to base columns")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
            let mut pairs = Vec::new();
            while let Some(pair) = access.next_entry::<String, String>()? {
                pairs.push(pair);
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(JoinVisitor)
}

/// Joining and filtering on extension tables
pub trait ExtensionComposer: Sized {
    /// Left-join the named extensions (all when `only` is `None`) and project
    /// their columns.
    fn with_extensions(self, only: Option<&[&str]>) -> Self;

    fn with_extension(self, table: &str) -> Self {
        self.with_extensions(Some(&[table]))
    }

    /// Compare the number of extension rows of each base row with `count`
    fn where_has_extension(self, table: &str, op: ComparisonOp, count: i64) -> Self;

    fn where_doesnt_have_extension(self, table: &str) -> Self {
        self.where_has_extension(table, ComparisonOp::Eq, 0)
    }

    /// Filter on the extension and join it
    fn with_where_has_extension(self, table: &str, op: ComparisonOp, count: i64) -> Self {
        self.where_has_extension(table, op, count)
            .with_extension(table)
    }
}

impl ExtensionComposer for MappedQuery {
    fn with_extensions(self, only: Option<&[&str]>) -> Self {
        let entity = Arc::clone(self.entity_type());
        let base = entity.table().to_string();
        let has_user_columns = self.builder().has_columns();
        let select_all = self.is_select_all();
        let auto_select = self.auto_selects();

        let mut projection: Vec<String> = Vec::new();
        if !has_user_columns {
            if auto_select {
                projection.extend(
                    entity
                        .mapper()
                        .base()
                        .raw_columns()
                        .map(|raw| entity.qualify(raw)),
                );
            } else {
                projection.push(format!("{}.*", base));
            }
        }

        let mut joins = Vec::new();
        for extension in entity.extensions() {
            if let Some(only) = only {
                if !only.contains(&extension.table.as_str()) {
                    continue;
                }
            }
            joins.push((extension.table.clone(), extension.join_condition(&base)));

            if select_all {
                projection.push(extension.qualify("*"));
            } else if has_user_columns || auto_select {
                projection.extend(extension.maps.raw_columns().map(|raw| extension.qualify(raw)));
            } else if extension.is_wildcard() {
                projection.push(extension.qualify("*"));
            } else {
                projection.extend(
                    extension
                        .columns
                        .iter()
                        .flatten()
                        .map(|column| extension.qualify(column)),
                );
            }
        }

        log::trace!(
            "[{}] joining extensions {:?}",
            entity.name(),
            joins.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>()
        );

        self.map_builder(|mut builder| {
            for (table, on) in joins {
                builder = builder.left_join(table, on);
            }
            for column in projection {
                builder = builder.add_select(column);
            }
            builder
        })
        .wrap_eager_loads(|query| {
            if query.entity_type().has_extensions() {
                query.with_extensions(None)
            } else {
                query
            }
        })
    }

    fn where_has_extension(self, table: &str, op: ComparisonOp, count: i64) -> Self {
        let entity = Arc::clone(self.entity_type());
        let extension = match entity.find_extension(table) {
            Some(extension) => extension,
            None => return self,
        };

        let rows = SelectBuilder::new(extension.table.as_str())
            .add_select(Expr::raw("COUNT(*)"))
            .where_clause(extension.join_condition(entity.table()));
        self.map_builder(|b| {
            b.and_where(Condition::Simple {
                column: Expr::sub_query(rows),
                op,
                value: Some(Value::from(count)),
            })
        })
    }
}

impl Entity {
    /// Fetch the first extension row for this entity and keep it; `None` for
    /// an unknown extension or when no row exists.
    pub async fn load_extension(
        &mut self,
        table: &str,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<Option<&Map<String, Value>>> {
        let extension = match self.entity_type().find_extension(table) {
            Some(extension) => extension.clone(),
            None => return Ok(None),
        };

        let sql = extension.rows_for(self).limit(1).build()?;
        log::debug!("[{}] {}", self.entity_type().name(), sql);
        let row = backend
            .query(&sql)
            .await?
            .into_iter()
            .next()
            .map(QueryRow::into_map);

        self.set_extension_data(table, row);
        Ok(self.extension_data(table))
    }

    /// Number of extension rows for this entity; 0 for an unknown extension
    pub async fn count_extension_records(
        &self,
        table: &str,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<i64> {
        let extension = match self.entity_type().find_extension(table) {
            Some(extension) => extension,
            None => return Ok(0),
        };

        let sql = extension
            .rows_for(self)
            .aggregate(AggregateFunc::Count, "*", Some("aggregate"))
            .build()?;
        log::debug!("[{}] {}", self.entity_type().name(), sql);
        let rows = backend.query(&sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_i64("aggregate"))
            .unwrap_or(0))
    }

    pub async fn has_extension_records(
        &self,
        table: &str,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<bool> {
        Ok(self.count_extension_records(table, backend).await? > 0)
    }

    pub async fn has_multiple_extension_records(
        &self,
        table: &str,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<bool> {
        Ok(self.count_extension_records(table, backend).await? > 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::schema::{Schema, SchemaBuilder};
    use serde_json::json;

    fn item_type() -> EntityType {
        EntityType::new("item", "test_items")
            .maps(NameMap::from_iter([
                ("ICITEM", "item_number"),
                ("ICDESC", "description"),
                ("ICCOMP", "company_number"),
            ]))
            .extension(
                Extension::new("test_item_extensions")
                    .join_on("EXITEM", "ICITEM")
                    .join_on("EXCOMP", "ICCOMP")
                    .map("EXDATA", "ext_data")
                    .map("EXNOTE", "ext_note"),
            )
            .extension(
                Extension::new("test_item_details")
                    .join_on("DTITEM", "ICITEM")
                    .with_columns(&["DTITEM", "DTINFO"])
                    .map("DTINFO", "detail_info"),
            )
    }

    fn schema() -> Arc<Schema> {
        SchemaBuilder::new().entity(item_type()).build().unwrap()
    }

    fn items() -> MappedQuery {
        schema().query("item").unwrap().unfiltered()
    }

    #[test]
    fn test_auto_select_projects_only_mapped_columns() {
        let sql = items().with_extension("test_item_extensions").to_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT test_items.ICITEM, test_items.ICDESC, test_items.ICCOMP, \
             test_item_extensions.EXDATA, test_item_extensions.EXNOTE FROM test_items \
             LEFT JOIN test_item_extensions ON (test_item_extensions.EXITEM = test_items.ICITEM \
             AND test_item_extensions.EXCOMP = test_items.ICCOMP)"
        );
    }

    #[test]
    fn test_select_all_projects_every_table() {
        let sql = items().select_all().with_extensions(None).to_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT test_items.*, test_item_extensions.*, test_item_details.* FROM test_items \
             LEFT JOIN test_item_extensions ON (test_item_extensions.EXITEM = test_items.ICITEM \
             AND test_item_extensions.EXCOMP = test_items.ICCOMP) \
             LEFT JOIN test_item_details ON test_item_details.DTITEM = test_items.ICITEM"
        );
    }

    #[test]
    fn test_without_auto_select_uses_configured_columns() {
        let sql = items()
            .without_global_scope(crate::query::GlobalScope::AutoSelectMapped)
            .with_extension("test_item_details")
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT test_items.*, test_item_details.DTITEM, test_item_details.DTINFO FROM test_items \
             LEFT JOIN test_item_details ON test_item_details.DTITEM = test_items.ICITEM"
        );
    }

    #[test]
    fn test_user_columns_get_mapped_extension_columns_only() {
        let sql = items()
            .select(&["item_number"])
            .with_extension("test_item_details")
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT ICITEM, test_item_details.DTINFO FROM test_items \
             LEFT JOIN test_item_details ON test_item_details.DTITEM = test_items.ICITEM"
        );
    }

    #[test]
    fn test_unknown_extension_is_neutral() {
        let sql = items()
            .select(&["item_number"])
            .with_extension("nope")
            .where_has_extension("nope", ComparisonOp::Ge, 1)
            .to_sql()
            .unwrap();
        assert_eq!(sql, "SELECT ICITEM FROM test_items");
    }

    #[test]
    fn test_where_has_extension_count_subquery() {
        let sql = items()
            .select(&["item_number"])
            .where_doesnt_have_extension("test_item_details")
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT ICITEM FROM test_items WHERE (SELECT COUNT(*) FROM test_item_details \
             WHERE test_item_details.DTITEM = test_items.ICITEM) = 0"
        );
    }

    #[test]
    fn test_extension_maps_merge_into_entity() {
        let entity = item_type();
        let mapper = entity.mapper();
        assert_eq!(crate::mapping::NameMapper::translate(mapper, "ext_data"), "EXDATA");
        assert_eq!(crate::mapping::NameMapper::untranslate(mapper, "DTINFO"), "detail_info");
    }

    #[test]
    fn test_join_pairs_keep_json_order() {
        let extension: Extension = serde_json::from_str(
            r#"{"table": "ext", "join": {"EXITEM": "ICITEM", "EXCOMP": "ICCOMP"}, "columns": ["*"]}"#,
        )
        .unwrap();
        assert_eq!(
            extension.join,
            vec![
                ("EXITEM".to_string(), "ICITEM".to_string()),
                ("EXCOMP".to_string(), "ICCOMP".to_string())
            ]
        );
        assert!(extension.is_wildcard());

        let round = serde_json::to_value(&extension).unwrap();
        assert_eq!(round["join"], json!({"EXITEM": "ICITEM", "EXCOMP": "ICCOMP"}));
    }

    #[test]
    fn test_rows_for_entity_uses_raw_values() {
        let entity_type = Arc::new(item_type());
        let mut row = QueryRow::new();
        row.insert("ICITEM", json!("A1"));
        row.insert("ICCOMP", Value::Null);
        let item = entity_type.hydrate(row);

        let sql = entity_type.extensions()[0].rows_for(&item).build().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM test_item_extensions WHERE (EXITEM = 'A1' AND EXCOMP IS NULL)"
        );
    }
}
