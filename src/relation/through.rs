use super::{CompositeKey, RelationMeta, RelationResolver};
use crate::builder::{Condition, Projection};
use crate::entity::{Entity, EntityType};
use crate::query::MappedQuery;
use serde_json::Value;
use std::sync::Arc;

/// Prefix of the projected intermediate key columns
pub const THROUGH_KEY_PREFIX: &str = "throughkey_";

/// Has-one-through and has-many-through via an intermediate table.
///
/// ```text
/// parent.local[i]        = through.first[i]
/// through.second_local[i] = related.second[i]
/// ```
///
/// The intermediate's first keys are projected under synthetic aliases so
/// that each related row can be traced back to its far parent.
#[derive(Debug, Clone)]
pub struct ThroughRelation {
    pub(crate) meta: RelationMeta,
    pub(crate) through: Arc<EntityType>,
    pub(crate) first_keys: Vec<String>,
    pub(crate) second_keys: Vec<String>,
    pub(crate) local_keys: Vec<String>,
    pub(crate) second_local_keys: Vec<String>,
}

impl ThroughRelation {
    pub fn through(&self) -> &Arc<EntityType> {
        &self.through
    }

    /// `throughkey_<COLUMN>` for each first key
    pub fn key_aliases(&self) -> Vec<String> {
        self.first_keys
            .iter()
            .map(|column| format!("{}{}", THROUGH_KEY_PREFIX, column))
            .collect()
    }

    fn join_condition(&self) -> Condition {
        Condition::all(
            self.second_keys
                .iter()
                .zip(&self.second_local_keys)
                .map(|(second, second_local)| {
                    Condition::columns_eq(
                        self.meta.related.qualify(second),
                        self.through.qualify(second_local),
                    )
                })
                .collect(),
        )
    }

    fn join_through(&self, query: MappedQuery) -> MappedQuery {
        let table = self.through.table().to_string();
        let on = self.join_condition();
        query.map_builder(|b| b.inner_join(table, on))
    }
}

/// Remove a synthetic column from a hydrated row, trying the upper-cased
/// alias, then the alias as written, then lower case. Every variant is
/// removed; when a backend returns several, the upper-case value wins.
fn take_alias(entity: &mut Entity, alias: &str) -> Option<Value> {
    let mut found = None;
    for candidate in [alias.to_ascii_uppercase(), alias.to_string(), alias.to_ascii_lowercase()] {
        if let Some(value) = entity.take_raw(&candidate) {
            found.get_or_insert(value);
        }
    }
    found
}

impl RelationResolver for ThroughRelation {
    fn meta(&self) -> &RelationMeta {
        &self.meta
    }

    fn parent_keys(&self) -> &[String] {
        &self.local_keys
    }

    fn constrained_columns(&self) -> Vec<String> {
        self.first_keys
            .iter()
            .map(|column| self.through.qualify(column))
            .collect()
    }

    fn prepare(&self, query: MappedQuery) -> MappedQuery {
        let synthetic = self
            .constrained_columns()
            .into_iter()
            .zip(self.key_aliases())
            .map(|(column, alias)| Projection::aliased(column, alias))
            .collect();
        self.join_through(query).with_synthetic(synthetic)
    }

    fn result_key(&self, entity: &mut Entity) -> Option<CompositeKey> {
        let values = self
            .key_aliases()
            .iter()
            .map(|alias| take_alias(entity, alias).unwrap_or(Value::Null))
            .collect();
        CompositeKey::new(values)
    }

    fn existence_query(&self, query: MappedQuery, parent_table: &str) -> MappedQuery {
        let conditions = self
            .constrained_columns()
            .into_iter()
            .zip(&self.local_keys)
            .map(|(first, local)| Condition::columns_eq(first, format!("{}.{}", parent_table, local)))
            .collect();
        self.join_through(query)
            .map_builder(|b| b.and_where(Condition::all(conditions)))
    }
}
