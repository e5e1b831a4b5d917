use super::{CompositeKey, RelationMeta, RelationResolver};
use crate::builder::Condition;
use crate::entity::Entity;
use crate::query::MappedQuery;

/// Belongs-to, has-one and has-many over key columns on the two tables.
///
/// For belongs-to the parent holds the foreign key and the related table the
/// owner key; for has-one/has-many the parent holds the local key and the
/// related table the foreign key. Either way the relation compares
/// `parent_keys[i]` with `related_keys[i]`.
#[derive(Debug, Clone)]
pub struct DirectRelation {
    pub(crate) meta: RelationMeta,
    pub(crate) parent_keys: Vec<String>,
    pub(crate) related_keys: Vec<String>,
}

impl DirectRelation {
    pub fn related_keys(&self) -> &[String] {
        &self.related_keys
    }
}

impl RelationResolver for DirectRelation {
    fn meta(&self) -> &RelationMeta {
        &self.meta
    }

    fn parent_keys(&self) -> &[String] {
        &self.parent_keys
    }

    fn constrained_columns(&self) -> Vec<String> {
        self.related_keys
            .iter()
            .map(|column| self.meta.related.qualify(column))
            .collect()
    }

    fn prepare(&self, query: MappedQuery) -> MappedQuery {
        query.require_columns(self.constrained_columns())
    }

    fn result_key(&self, entity: &mut Entity) -> Option<CompositeKey> {
        CompositeKey::from_attributes(entity.raw_attributes(), &self.related_keys)
    }

    fn existence_query(&self, query: MappedQuery, parent_table: &str) -> MappedQuery {
        let conditions = self
            .constrained_columns()
            .into_iter()
            .zip(&self.parent_keys)
            .map(|(related, parent)| {
                Condition::columns_eq(related, format!("{}.{}", parent_table, parent))
            })
            .collect();
        query.map_builder(|b| b.and_where(Condition::all(conditions)))
    }
}
