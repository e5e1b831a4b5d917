//! Relations over composite keys.
//!
//! DB2 has no tuple `IN`, so a batch of composite keys is expressed as an OR
//! of AND groups:
//!
//! ```text
//! (CTDEPT = 'ELEC' AND CTCOMP = '1') OR (CTDEPT = 'TOYS' AND CTCOMP = '1')
//! ```
//!
//! Relations are declared with [`RelationDef`], validated into a
//! [`RelationResolver`] when the schema is built, and resolved either lazily
//! for one entity or eagerly for a batch.

pub mod direct;
pub mod key;
pub mod through;

pub use direct::DirectRelation;
pub use key::CompositeKey;
pub use through::{ThroughRelation, THROUGH_KEY_PREFIX};

use crate::backend::DatabaseBackend;
use crate::builder::{ComparisonOp, Condition, Expr};
use crate::entity::{Entity, EntityType, Related};
use crate::error::{QueryError, Result};
use crate::mapping::NameMapper;
use crate::query::MappedQuery;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    HasOneThrough,
    HasManyThrough,
}

impl RelationKind {
    pub fn is_to_one(self) -> bool {
        matches!(
            self,
            RelationKind::BelongsTo | RelationKind::HasOne | RelationKind::HasOneThrough
        )
    }

    pub fn is_through(self) -> bool {
        matches!(self, RelationKind::HasOneThrough | RelationKind::HasManyThrough)
    }
}

/// One key column or an ordered list of them.
///
/// A single name gives a plain relation (`IN` batches); a list gives a
/// composite one, even when it has one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keys {
    Single(String),
    Composite(Vec<String>),
}

impl Keys {
    pub fn is_composite(&self) -> bool {
        matches!(self, Keys::Composite(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Keys::Single(_) => 1,
            Keys::Composite(columns) => columns.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw columns, translated through `entity`'s map
    fn translate(&self, entity: &EntityType) -> Vec<String> {
        match self {
            Keys::Single(column) => vec![entity.translate(column)],
            Keys::Composite(columns) => columns.iter().map(|c| entity.translate(c)).collect(),
        }
    }
}

impl From<&str> for Keys {
    fn from(column: &str) -> Self {
        Keys::Single(column.to_string())
    }
}

impl From<String> for Keys {
    fn from(column: String) -> Self {
        Keys::Single(column)
    }
}

impl From<Vec<&str>> for Keys {
    fn from(columns: Vec<&str>) -> Self {
        Keys::Composite(columns.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for Keys {
    fn from(columns: Vec<String>) -> Self {
        Keys::Composite(columns)
    }
}

impl<const N: usize> From<[&str; N]> for Keys {
    fn from(columns: [&str; N]) -> Self {
        Keys::Composite(columns.iter().map(|c| c.to_string()).collect())
    }
}

/// Declarative relation, keyed by human or raw column names.
///
/// Key roles follow the relation kind:
///
/// | kind | keys |
/// |------|------|
/// | `belongs_to` | `foreign_key` on the parent, `owner_key` on the related entity (defaults to `foreign_key`) |
/// | `has_one`, `has_many` | `foreign_key` on the related entity, `local_key` on the parent (defaults to `foreign_key`) |
/// | `has_*_through` | `first_key` on the intermediate, `second_key` on the related entity, `local_key` on the parent (defaults to `first_key`), `second_local_key` on the intermediate (defaults to `second_key`) |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDef {
    pub entity: String,
    pub name: String,
    pub kind: RelationKind,
    pub related: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<Keys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<Keys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_key: Option<Keys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_key: Option<Keys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_key: Option<Keys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_local_key: Option<Keys>,
    /// Attributes of the entity a to-one relation yields when nothing matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Map<String, Value>>,
}

impl RelationDef {
    fn new(entity: &str, name: &str, kind: RelationKind, related: &str) -> Self {
        Self {
            entity: entity.to_string(),
            name: name.to_string(),
            kind,
            related: related.to_string(),
            through: None,
            foreign_key: None,
            owner_key: None,
            local_key: None,
            first_key: None,
            second_key: None,
            second_local_key: None,
            default: None,
        }
    }

    pub fn belongs_to(entity: &str, name: &str, related: &str, foreign_key: impl Into<Keys>) -> Self {
        let mut def = Self::new(entity, name, RelationKind::BelongsTo, related);
        def.foreign_key = Some(foreign_key.into());
        def
    }

    pub fn has_one(entity: &str, name: &str, related: &str, foreign_key: impl Into<Keys>) -> Self {
        let mut def = Self::new(entity, name, RelationKind::HasOne, related);
        def.foreign_key = Some(foreign_key.into());
        def
    }

    pub fn has_many(entity: &str, name: &str, related: &str, foreign_key: impl Into<Keys>) -> Self {
        let mut def = Self::new(entity, name, RelationKind::HasMany, related);
        def.foreign_key = Some(foreign_key.into());
        def
    }

    pub fn has_one_through(
        entity: &str,
        name: &str,
        related: &str,
        through: &str,
        first_key: impl Into<Keys>,
        second_key: impl Into<Keys>,
    ) -> Self {
        let mut def = Self::new(entity, name, RelationKind::HasOneThrough, related);
        def.through = Some(through.to_string());
        def.first_key = Some(first_key.into());
        def.second_key = Some(second_key.into());
        def
    }

    pub fn has_many_through(
        entity: &str,
        name: &str,
        related: &str,
        through: &str,
        first_key: impl Into<Keys>,
        second_key: impl Into<Keys>,
    ) -> Self {
        let mut def = Self::new(entity, name, RelationKind::HasManyThrough, related);
        def.through = Some(through.to_string());
        def.first_key = Some(first_key.into());
        def.second_key = Some(second_key.into());
        def
    }

    pub fn owner_key(mut self, keys: impl Into<Keys>) -> Self {
        self.owner_key = Some(keys.into());
        self
    }

    pub fn local_key(mut self, keys: impl Into<Keys>) -> Self {
        self.local_key = Some(keys.into());
        self
    }

    pub fn second_local_key(mut self, keys: impl Into<Keys>) -> Self {
        self.second_local_key = Some(keys.into());
        self
    }

    /// Attributes (human or raw names) of the fallback for a to-one relation
    pub fn with_default(mut self, attributes: Map<String, Value>) -> Self {
        self.default = Some(attributes);
        self
    }

    fn required<'a>(&self, keys: &'a Option<Keys>, role: &str) -> Result<&'a Keys> {
        keys.as_ref().ok_or_else(|| {
            QueryError::config(format!(
                "relation '{}.{}' requires a {}",
                self.entity, self.name, role
            ))
        })
    }

    fn check_pair(&self, left: &Keys, right: &Keys, roles: (&str, &str)) -> Result<()> {
        if left.is_empty() || right.is_empty() {
            return Err(QueryError::config(format!(
                "relation '{}.{}' has an empty key list",
                self.entity, self.name
            )));
        }
        if left.is_composite() != right.is_composite() {
            return Err(QueryError::config(format!(
                "relation '{}.{}' mixes composite and single keys ({} vs {})",
                self.entity, self.name, roles.0, roles.1
            )));
        }
        if left.len() != right.len() {
            return Err(QueryError::config(format!(
                "relation '{}.{}' has {} {} columns but {} {} columns",
                self.entity,
                self.name,
                left.len(),
                roles.0,
                right.len(),
                roles.1
            )));
        }
        Ok(())
    }

    /// Validate against registered entity types and translate every key to
    /// raw columns.
    pub(crate) fn resolve(
        &self,
        entities: &HashMap<String, Arc<EntityType>>,
    ) -> Result<Arc<dyn RelationResolver>> {
        let lookup = |name: &str| -> Result<Arc<EntityType>> {
            entities.get(name).cloned().ok_or_else(|| {
                QueryError::config(format!(
                    "relation '{}.{}' refers to unknown entity '{}'",
                    self.entity, self.name, name
                ))
            })
        };
        let parent = lookup(&self.entity)?;
        let related = lookup(&self.related)?;

        let meta = |composite: bool| RelationMeta {
            name: self.name.clone(),
            kind: self.kind,
            parent: Arc::clone(&parent),
            related: Arc::clone(&related),
            composite,
            default: self.default.clone(),
        };

        let resolver: Arc<dyn RelationResolver> = match self.kind {
            RelationKind::BelongsTo => {
                let foreign = self.required(&self.foreign_key, "foreign key")?;
                let owner = self.owner_key.as_ref().unwrap_or(foreign);
                self.check_pair(foreign, owner, ("foreign", "owner"))?;
                Arc::new(DirectRelation {
                    meta: meta(foreign.is_composite()),
                    parent_keys: foreign.translate(&parent),
                    related_keys: owner.translate(&related),
                })
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let foreign = self.required(&self.foreign_key, "foreign key")?;
                let local = self.local_key.as_ref().unwrap_or(foreign);
                self.check_pair(foreign, local, ("foreign", "local"))?;
                Arc::new(DirectRelation {
                    meta: meta(foreign.is_composite()),
                    parent_keys: local.translate(&parent),
                    related_keys: foreign.translate(&related),
                })
            }
            RelationKind::HasOneThrough | RelationKind::HasManyThrough => {
                let through_name = self
                    .through
                    .as_deref()
                    .ok_or_else(|| {
                        QueryError::config(format!(
                            "relation '{}.{}' requires an intermediate entity",
                            self.entity, self.name
                        ))
                    })?;
                let through = lookup(through_name)?;
                let first = self.required(&self.first_key, "first key")?;
                let second = self.required(&self.second_key, "second key")?;
                let local = self.local_key.as_ref().unwrap_or(first);
                let second_local = self.second_local_key.as_ref().unwrap_or(second);
                self.check_pair(first, local, ("first", "local"))?;
                self.check_pair(second, second_local, ("second", "second local"))?;
                Arc::new(ThroughRelation {
                    meta: meta(first.is_composite()),
                    first_keys: first.translate(&through),
                    second_keys: second.translate(&related),
                    local_keys: local.translate(&parent),
                    second_local_keys: second_local.translate(&through),
                    through,
                })
            }
        };

        log::debug!(
            "relation {}.{} ({:?}) -> {}: parent keys {:?}, matched on {:?}",
            self.entity,
            self.name,
            self.kind,
            self.related,
            resolver.parent_keys(),
            resolver.constrained_columns()
        );
        Ok(resolver)
    }
}

/// Validated, immutable part shared by every relation kind
#[derive(Debug, Clone)]
pub struct RelationMeta {
    pub name: String,
    pub kind: RelationKind,
    pub parent: Arc<EntityType>,
    pub related: Arc<EntityType>,
    pub composite: bool,
    pub default: Option<Map<String, Value>>,
}

/// Resolution of one relation: constraints, eager batching, result matching.
pub trait RelationResolver: fmt::Debug + Send + Sync {
    fn meta(&self) -> &RelationMeta;

    /// Raw columns on the parent that hold the key values
    fn parent_keys(&self) -> &[String];

    /// Qualified columns the parent key values are compared with
    fn constrained_columns(&self) -> Vec<String>;

    /// Shape a query over the related entity: joins and extra projections
    fn prepare(&self, query: MappedQuery) -> MappedQuery;

    /// Key a related row matches on. Synthetic columns are removed from the
    /// entity.
    fn result_key(&self, entity: &mut Entity) -> Option<CompositeKey>;

    /// Related query correlated with `parent_table`, for `EXISTS`
    fn existence_query(&self, query: MappedQuery, parent_table: &str) -> MappedQuery;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn kind(&self) -> RelationKind {
        self.meta().kind
    }

    fn related(&self) -> &Arc<EntityType> {
        &self.meta().related
    }

    fn parent_key(&self, parent: &Entity) -> Option<CompositeKey> {
        CompositeKey::from_attributes(parent.raw_attributes(), self.parent_keys())
    }

    /// One equality per key position, ANDed
    fn key_condition(&self, key: &CompositeKey) -> Condition {
        let mut conditions: Vec<Condition> = self
            .constrained_columns()
            .into_iter()
            .zip(key.values())
            .map(|(column, value)| Condition::eq(column, value.clone()))
            .collect();
        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::all(conditions)
        }
    }

    /// Every key in one predicate: `IN` for single keys, an OR of AND groups
    /// for composite ones.
    fn eager_condition(&self, keys: &[CompositeKey]) -> Condition {
        if !self.meta().composite {
            let values = keys.iter().map(|k| k.values()[0].clone()).collect();
            let column = self.constrained_columns().remove(0);
            return Condition::Simple {
                column: Expr::Column(column),
                op: ComparisonOp::In,
                value: Some(Value::Array(values)),
            };
        }
        Condition::any(keys.iter().map(|k| self.key_condition(k)).collect())
    }

    /// Constrain to rows related to `parent`; `None` when its key has a
    /// null component.
    fn add_constraints(&self, query: MappedQuery, parent: &Entity) -> Option<MappedQuery> {
        let key = self.parent_key(parent)?;
        let condition = self.key_condition(&key);
        Some(query.map_builder(|b| b.and_where(condition)))
    }

    fn add_eager_constraints(&self, query: MappedQuery, keys: &[CompositeKey]) -> MappedQuery {
        let condition = self.eager_condition(keys);
        query.map_builder(|b| b.and_where(condition))
    }

    /// What a parent gets when nothing matches
    fn empty_result(&self) -> Related {
        let meta = self.meta();
        if !meta.kind.is_to_one() {
            return Related::Many(Vec::new());
        }
        let default = meta.default.as_ref().map(|attributes| {
            let mut entity = meta.related.new_entity();
            entity.fill(attributes.clone());
            Box::new(entity)
        });
        Related::One(default)
    }
}

/// Related rows grouped by key, in arrival order
pub fn build_dictionary(
    resolver: &dyn RelationResolver,
    results: Vec<Entity>,
) -> HashMap<CompositeKey, Vec<Entity>> {
    let mut dictionary: HashMap<CompositeKey, Vec<Entity>> = HashMap::new();
    for mut entity in results {
        match resolver.result_key(&mut entity) {
            Some(key) => dictionary.entry(key).or_default().push(entity),
            None => log::trace!("relation '{}': result without key", resolver.name()),
        }
    }
    dictionary
}

/// Attach matching results to each parent. To-one relations take the first
/// result for the key.
pub fn match_results(resolver: &dyn RelationResolver, parents: &mut [Entity], results: Vec<Entity>) {
    let dictionary = build_dictionary(resolver, results);
    let to_one = resolver.kind().is_to_one();

    for parent in parents.iter_mut() {
        let matched = resolver
            .parent_key(parent)
            .and_then(|key| dictionary.get(&key));
        let related = match matched {
            Some(entities) if to_one => match entities.first() {
                Some(first) => Related::One(Some(Box::new(first.clone()))),
                None => resolver.empty_result(),
            },
            Some(entities) => Related::Many(entities.clone()),
            None => resolver.empty_result(),
        };
        parent.set_relation(resolver.name(), related);
    }
}

/// Load a relation for every parent with one query.
pub(crate) async fn eager_load(
    resolver: &dyn RelationResolver,
    parents: &mut [Entity],
    query: MappedQuery,
    backend: &mut dyn DatabaseBackend,
) -> Result<()> {
    let mut seen = HashSet::new();
    let keys: Vec<CompositeKey> = parents
        .iter()
        .filter_map(|parent| resolver.parent_key(parent))
        .filter(|key| seen.insert(key.encoded().to_string()))
        .collect();

    if keys.is_empty() {
        log::debug!(
            "eager load '{}': no parent has a complete key, skipping query",
            resolver.name()
        );
        for parent in parents.iter_mut() {
            parent.set_relation(resolver.name(), resolver.empty_result());
        }
        return Ok(());
    }

    log::debug!(
        "eager load '{}': {} parents, {} distinct keys",
        resolver.name(),
        parents.len(),
        keys.len()
    );
    let results = resolver
        .add_eager_constraints(query, &keys)
        .get(backend)
        .await?;
    match_results(resolver, parents, results);
    Ok(())
}

/// Load a relation for one parent.
pub(crate) async fn get_results(
    resolver: &dyn RelationResolver,
    parent: &Entity,
    query: MappedQuery,
    backend: &mut dyn DatabaseBackend,
) -> Result<Related> {
    let query = match resolver.add_constraints(query, parent) {
        Some(query) => query,
        None => {
            log::debug!(
                "relation '{}': parent key has a null component, skipping query",
                resolver.name()
            );
            return Ok(resolver.empty_result());
        }
    };

    let to_one = resolver.kind().is_to_one();
    let query = if to_one { query.limit(1) } else { query };
    let mut results = query.get(backend).await?;
    for entity in &mut results {
        resolver.result_key(entity);
    }

    Ok(if to_one {
        match results.into_iter().next() {
            Some(entity) => Related::One(Some(Box::new(entity))),
            None => resolver.empty_result(),
        }
    } else {
        Related::Many(results)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::QueryRow;
    use crate::mapping::NameMap;
    use serde_json::json;

    fn entities() -> HashMap<String, Arc<EntityType>> {
        let department = EntityType::new("department", "test_departments").maps(NameMap::from_iter([
            ("DPCODE", "code"),
            ("DPCOMP", "company_number"),
        ]));
        let category = EntityType::new("category", "test_categories").maps(NameMap::from_iter([
            ("CTCODE", "code"),
            ("CTDEPT", "department_code"),
            ("CTCOMP", "company_number"),
        ]));
        let item = EntityType::new("item", "test_items_rel").maps(NameMap::from_iter([
            ("ITCODE", "item_code"),
            ("ITCAT", "category_code"),
            ("ITCOMP", "company_number"),
        ]));
        [department, category, item]
            .into_iter()
            .map(|e| (e.name().to_string(), Arc::new(e)))
            .collect()
    }

    fn categories() -> Arc<dyn RelationResolver> {
        RelationDef::has_many(
            "department",
            "categories",
            "category",
            ["department_code", "company_number"],
        )
        .local_key(["code", "company_number"])
        .resolve(&entities())
        .unwrap()
    }

    fn hydrate(entity: &Arc<EntityType>, values: &[(&str, Value)]) -> Entity {
        let mut row = QueryRow::new();
        for (k, v) in values {
            row.insert(*k, v.clone());
        }
        entity.hydrate(row)
    }

    #[test]
    fn test_keys_are_translated_per_side() {
        let relation = categories();
        assert_eq!(relation.parent_keys(), &["DPCODE", "DPCOMP"]);
        assert_eq!(
            relation.constrained_columns(),
            vec!["test_categories.CTDEPT", "test_categories.CTCOMP"]
        );
    }

    #[test]
    fn test_omitted_owner_key_defaults_to_foreign_key() {
        let relation = RelationDef::belongs_to("category", "department", "department", ["code", "company_number"])
            .resolve(&entities())
            .unwrap();
        // Translated through each side's own map.
        assert_eq!(relation.parent_keys(), &["CTCODE", "CTCOMP"]);
        assert_eq!(
            relation.constrained_columns(),
            vec!["test_departments.DPCODE", "test_departments.DPCOMP"]
        );
    }

    #[test]
    fn test_invalid_definitions_fail_fast() {
        let entities = entities();

        let arity = RelationDef::has_many("department", "c", "category", ["CTDEPT", "CTCOMP"])
            .local_key(["DPCODE"])
            .resolve(&entities);
        assert!(matches!(arity, Err(QueryError::Config(_))));

        let mixed = RelationDef::has_many("department", "c", "category", ["CTDEPT"])
            .local_key("DPCODE")
            .resolve(&entities);
        assert!(matches!(mixed, Err(QueryError::Config(_))));

        let empty = RelationDef::has_many("department", "c", "category", Vec::<String>::new())
            .resolve(&entities);
        assert!(matches!(empty, Err(QueryError::Config(_))));

        let unknown = RelationDef::has_many("department", "c", "nothing", "X").resolve(&entities);
        assert!(matches!(unknown, Err(QueryError::Config(_))));
    }

    #[test]
    fn test_eager_condition_is_or_of_and_groups() {
        let relation = categories();
        let keys = vec![
            CompositeKey::new(vec![json!("ELEC"), json!("1")]).unwrap(),
            CompositeKey::new(vec![json!("TOYS"), json!("1")]).unwrap(),
        ];
        assert_eq!(
            relation.eager_condition(&keys).to_sql(),
            "((test_categories.CTDEPT = 'ELEC' AND test_categories.CTCOMP = '1') OR \
             (test_categories.CTDEPT = 'TOYS' AND test_categories.CTCOMP = '1'))"
        );
    }

    #[test]
    fn test_single_key_degrades_to_in() {
        let relation = RelationDef::has_many("department", "categories", "category", "department_code")
            .local_key("code")
            .resolve(&entities())
            .unwrap();
        let keys = vec![
            CompositeKey::new(vec![json!("ELEC")]).unwrap(),
            CompositeKey::new(vec![json!("TOYS")]).unwrap(),
        ];
        assert_eq!(
            relation.eager_condition(&keys).to_sql(),
            "test_categories.CTDEPT IN ('ELEC', 'TOYS')"
        );
        assert_eq!(relation.key_condition(&keys[0]).to_sql(), "test_categories.CTDEPT = 'ELEC'");
    }

    #[test]
    fn test_match_results_uses_exact_composite_key() {
        let entities = entities();
        let relation = categories();
        let department = &entities["department"];
        let category = &entities["category"];

        let mut parents = vec![
            hydrate(department, &[("DPCODE", json!("A")), ("DPCOMP", json!("1"))]),
            hydrate(department, &[("DPCODE", json!("A")), ("DPCOMP", json!("2"))]),
            hydrate(department, &[("DPCODE", json!("B")), ("DPCOMP", Value::Null)]),
        ];
        let results = vec![
            hydrate(category, &[("CTCODE", json!("X")), ("CTDEPT", json!("A")), ("CTCOMP", json!("1"))]),
            hydrate(category, &[("CTCODE", json!("Y")), ("CTDEPT", json!("A")), ("CTCOMP", json!("1"))]),
            hydrate(category, &[("CTCODE", json!("Z")), ("CTDEPT", json!("A")), ("CTCOMP", json!("3"))]),
        ];

        assert_eq!(build_dictionary(relation.as_ref(), results.clone()).len(), 2);

        match_results(relation.as_ref(), &mut parents, results);
        let codes = |parent: &Entity| -> Vec<Value> {
            parent
                .relation("categories")
                .unwrap()
                .as_many()
                .iter()
                .filter_map(|c| c.get("code"))
                .collect()
        };
        assert_eq!(codes(&parents[0]), vec![json!("X"), json!("Y")]);
        assert!(codes(&parents[1]).is_empty());
        assert!(codes(&parents[2]).is_empty());
    }

    #[test]
    fn test_to_one_keeps_first_match_and_default() {
        let entities = entities();
        let mut default = Map::new();
        default.insert("code".into(), json!("NONE"));
        let relation = RelationDef::belongs_to("category", "department", "department", ["department_code", "company_number"])
            .owner_key(["code", "company_number"])
            .with_default(default)
            .resolve(&entities)
            .unwrap();

        let category = &entities["category"];
        let department = &entities["department"];
        let mut parents = vec![
            hydrate(category, &[("CTDEPT", json!("A")), ("CTCOMP", json!("1"))]),
            hydrate(category, &[("CTDEPT", json!("Q")), ("CTCOMP", json!("1"))]),
        ];
        let results = vec![
            hydrate(department, &[("DPCODE", json!("A")), ("DPCOMP", json!("1")), ("DPNAME", json!("first"))]),
            hydrate(department, &[("DPCODE", json!("A")), ("DPCOMP", json!("1")), ("DPNAME", json!("second"))]),
        ];
        match_results(relation.as_ref(), &mut parents, results);

        let first = parents[0].relation("department").unwrap().as_one().unwrap();
        assert_eq!(first.get("DPNAME"), Some(json!("first")));

        let fallback = parents[1].relation("department").unwrap().as_one().unwrap();
        assert_eq!(fallback.get_raw("DPCODE"), Some(&json!("NONE")));
        assert!(!fallback.exists());
    }

    #[test]
    fn test_through_result_key_strips_alias() {
        let entities = entities();
        let relation = RelationDef::has_many_through(
            "department",
            "items",
            "item",
            "category",
            ["department_code", "company_number"],
            ["category_code", "company_number"],
        )
        .local_key(["code", "company_number"])
        .second_local_key(["code", "company_number"])
        .resolve(&entities)
        .unwrap();

        let mut item = hydrate(
            &entities["item"],
            &[
                ("ITCODE", json!("I1")),
                ("THROUGHKEY_CTDEPT", json!("ELEC")),
                ("throughkey_CTCOMP", json!("1")),
            ],
        );
        let key = relation.result_key(&mut item).unwrap();
        assert_eq!(key.values(), &[json!("ELEC"), json!("1")]);
        let keys: Vec<&String> = item.raw_attributes().keys().collect();
        assert_eq!(keys, vec!["ITCODE"]);
    }
}
