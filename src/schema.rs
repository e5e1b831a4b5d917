use crate::backend::DatabaseBackend;
use crate::config::SchemaConfig;
use crate::entity::{Entity, EntityType, Related};
use crate::error::{QueryError, Result};
use crate::query::MappedQuery;
use crate::relation::{self, RelationDef, RelationResolver};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Collects entity types and relation definitions, then validates them
/// together.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityType>,
    relations: Vec<RelationDef>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Validate every relation and translate its keys to raw columns.
    pub fn build(self) -> Result<Arc<Schema>> {
        let mut entities: HashMap<String, Arc<EntityType>> = HashMap::new();
        for entity in self.entities {
            let name = entity.name().to_string();
            if entities.contains_key(&name) {
                return Err(QueryError::Schema(format!(
                    "Entity {} already registered",
                    name
                )));
            }
            entities.insert(name, Arc::new(entity));
        }

        let mut relations: HashMap<String, HashMap<String, Arc<dyn RelationResolver>>> =
            HashMap::new();
        for def in &self.relations {
            let resolver = def.resolve(&entities)?;
            let by_name = relations.entry(def.entity.clone()).or_default();
            if by_name.contains_key(&def.name) {
                return Err(QueryError::config(format!(
                    "relation '{}.{}' defined twice",
                    def.entity, def.name
                )));
            }
            by_name.insert(def.name.clone(), resolver);
        }

        log::debug!(
            "schema built: {} entities, {} relations",
            entities.len(),
            self.relations.len()
        );
        Ok(Arc::new(Schema {
            entities,
            relations,
        }))
    }
}

/// Registry of entity types and their relations; the entry point for queries.
#[derive(Debug)]
pub struct Schema {
    entities: HashMap<String, Arc<EntityType>>,
    relations: HashMap<String, HashMap<String, Arc<dyn RelationResolver>>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn from_config(config: SchemaConfig) -> Result<Arc<Self>> {
        let mut builder = SchemaBuilder::new();
        for entity in config.entities {
            builder = builder.entity(entity.into());
        }
        for relation in config.relations {
            builder = builder.relation(relation);
        }
        builder.build()
    }

    pub fn from_json(json: &str) -> Result<Arc<Self>> {
        Self::from_config(SchemaConfig::from_json(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::from_config(SchemaConfig::from_path(path)?)
    }

    pub fn entity(&self, name: &str) -> Result<&Arc<EntityType>> {
        self.entities
            .get(name)
            .ok_or_else(|| QueryError::EntityNotRegistered(name.to_string()))
    }

    /// Registered entity names, sorted
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// New query over the named entity
    pub fn query(self: &Arc<Self>, entity: &str) -> Result<MappedQuery> {
        let entity = Arc::clone(self.entity(entity)?);
        Ok(MappedQuery::new(Arc::clone(self), entity))
    }

    pub(crate) fn query_type(self: &Arc<Self>, entity: &Arc<EntityType>) -> MappedQuery {
        MappedQuery::new(Arc::clone(self), Arc::clone(entity))
    }

    pub fn relation(&self, entity: &str, name: &str) -> Result<Arc<dyn RelationResolver>> {
        self.relations
            .get(entity)
            .and_then(|by_name| by_name.get(name))
            .cloned()
            .ok_or_else(|| QueryError::UnknownRelation {
                entity: entity.to_string(),
                relation: name.to_string(),
            })
    }

    /// Relation names of an entity, sorted
    pub fn relation_names(&self, entity: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .relations
            .get(entity)
            .map(|by_name| by_name.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Resolve a relation of one entity
    pub async fn related(
        self: &Arc<Self>,
        parent: &Entity,
        name: &str,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<Related> {
        self.related_with(parent, name, |q| q, backend).await
    }

    /// Resolve a relation of one entity, adjusting the related query first
    pub async fn related_with(
        self: &Arc<Self>,
        parent: &Entity,
        name: &str,
        constraint: impl FnOnce(MappedQuery) -> MappedQuery,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<Related> {
        let resolver = self.relation(parent.entity_type().name(), name)?;
        let query = constraint(resolver.prepare(self.query_type(resolver.related())));
        relation::get_results(resolver.as_ref(), parent, query, backend).await
    }

    /// Resolve a relation and keep it on the entity
    pub async fn load(
        self: &Arc<Self>,
        parent: &mut Entity,
        name: &str,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<()> {
        let related = self.related(parent, name, backend).await?;
        parent.set_relation(name, related);
        Ok(())
    }
}
