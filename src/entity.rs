//! Entity types and hydrated entity instances.
//!
//! An [`EntityType`] describes one legacy table: its name map, extension
//! tables, casts, and options. An [`Entity`] is one row of it. Attributes are
//! stored once, under raw column names; human names are only a view.

use crate::backend::{DatabaseBackend, QueryRow};
use crate::builder::{Condition, DeleteBuilder, InsertBuilder, UpdateBuilder};
use crate::cast::{default_mapped_casts, Cast};
use crate::config::EntityOptions;
use crate::error::{QueryError, Result};
use crate::extension::Extension;
use crate::mapping::{ColumnMapper, NameMap, NameMapper};
use crate::query::AliasTable;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Description of a legacy table and how its columns are presented
#[derive(Debug, Clone)]
pub struct EntityType {
    name: String,
    table: String,
    mapper: ColumnMapper,
    extensions: Vec<Extension>,
    options: EntityOptions,
    casts: HashMap<String, Arc<dyn Cast>>,
}

impl EntityType {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            mapper: ColumnMapper::default(),
            extensions: Vec::new(),
            options: EntityOptions::default(),
            casts: HashMap::new(),
        }
    }

    /// Set the base table's name map, keeping any extension maps
    pub fn maps(mut self, maps: NameMap) -> Self {
        let mut mapper = ColumnMapper::new(maps);
        for extension in &self.extensions {
            mapper.add_extension(extension.table.clone(), extension.maps.clone());
        }
        self.mapper = mapper;
        self
    }

    /// Map a single raw column
    pub fn map(mut self, raw: impl Into<String>, human: impl Into<String>) -> Self {
        self.mapper.insert(raw, human);
        self
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.mapper
            .add_extension(extension.table.clone(), extension.maps.clone());
        match self.extensions.iter_mut().find(|e| e.table == extension.table) {
            Some(existing) => *existing = extension,
            None => self.extensions.push(extension),
        }
        self
    }

    pub fn options(mut self, options: EntityOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a cast for a column, by raw or human name
    pub fn cast(mut self, column: impl Into<String>, cast: Arc<dyn Cast>) -> Self {
        self.casts.insert(column.into(), cast);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn mapper(&self) -> &ColumnMapper {
        &self.mapper
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn find_extension(&self, table: &str) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.table == table)
    }

    pub fn get_options(&self) -> &EntityOptions {
        &self.options
    }

    /// Whether the base table declares any mapped columns
    pub fn has_maps(&self) -> bool {
        !self.mapper.base().is_empty()
    }

    pub fn has_extensions(&self) -> bool {
        !self.extensions.is_empty()
    }

    /// Whether `raw` belongs to an extension table rather than the base
    /// table: mapped, listed, or joined on by an extension, and not mapped on
    /// the base table.
    pub fn is_extension_column(&self, raw: &str) -> bool {
        if self.mapper.base().human(raw).is_some() {
            return false;
        }
        self.extensions.iter().any(|extension| {
            extension.maps.human(raw).is_some()
                || extension.join.iter().any(|(aux, _)| aux == raw)
                || extension
                    .columns
                    .iter()
                    .flatten()
                    .any(|column| column == raw)
        })
    }

    /// `table.column`
    pub fn qualify(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }

    /// Raw column a human name resolves to, or `None` when it is not mapped.
    ///
    /// Scopes keyed on conventional names (`delete_code`, `company_number`)
    /// only apply to entity types that map them.
    pub fn mapped_column(&self, human: &str) -> Option<String> {
        self.mapper
            .is_mapped(human)
            .then(|| self.mapper.translate(human))
    }

    /// Cast for a raw column: an explicit one registered under the raw or
    /// human name, else a default for the mapped human name.
    pub fn cast_for(&self, raw: &str) -> Option<Arc<dyn Cast>> {
        if let Some(cast) = self.casts.get(raw) {
            return Some(Arc::clone(cast));
        }
        let human = self.mapper.untranslate(raw);
        if let Some(cast) = self.casts.get(&human) {
            return Some(Arc::clone(cast));
        }
        if human == raw {
            return None;
        }
        default_mapped_casts()
            .into_iter()
            .find(|(name, _)| *name == human)
            .map(|(_, cast)| cast)
    }

    /// A fresh, unsaved instance
    pub fn new_entity(self: &Arc<Self>) -> Entity {
        Entity {
            entity_type: Arc::clone(self),
            attributes: Map::new(),
            original: Map::new(),
            exists: false,
            relations: Vec::new(),
            extension_data: HashMap::new(),
            aliased: HashSet::new(),
        }
    }

    /// An instance loaded from a result row, keyed by raw column
    pub fn hydrate(self: &Arc<Self>, row: QueryRow) -> Entity {
        let attributes = row.into_map();
        Entity {
            entity_type: Arc::clone(self),
            original: attributes.clone(),
            attributes,
            exists: true,
            relations: Vec::new(),
            extension_data: HashMap::new(),
            aliased: HashSet::new(),
        }
    }
}

impl NameMapper for EntityType {
    fn translate(&self, name: &str) -> String {
        self.mapper.translate(name)
    }

    fn untranslate(&self, raw: &str) -> String {
        self.mapper.untranslate(raw)
    }
}

/// Loaded value of a relation on an entity
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Related {
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Related::One(entity) => entity.as_deref(),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Entity] {
        match self {
            Related::Many(entities) => entities,
            Related::One(_) => &[],
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Related::One(Some(entity)) => Value::Object(entity.to_map()),
            Related::One(None) => Value::Null,
            Related::Many(entities) => {
                Value::Array(entities.iter().map(|e| Value::Object(e.to_map())).collect())
            }
        }
    }
}

/// One row of an entity type
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: Arc<EntityType>,
    attributes: Map<String, Value>,
    original: Map<String, Value>,
    exists: bool,
    relations: Vec<(String, Related)>,
    extension_data: HashMap<String, Option<Map<String, Value>>>,
    /// Attributes projected under a caller alias; not columns of the table
    aliased: HashSet<String>,
}

impl Entity {
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Whether the entity was loaded from (or saved to) the database
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Raw column holding `name`: the name itself, its translation, or its
    /// reverse translation, whichever is present.
    fn resolve_key(&self, name: &str) -> Option<String> {
        if self.attributes.contains_key(name) {
            return Some(name.to_string());
        }
        let raw = self.entity_type.translate(name);
        if self.attributes.contains_key(&raw) {
            return Some(raw);
        }
        let human = self.entity_type.untranslate(name);
        if self.attributes.contains_key(&human) {
            return Some(human);
        }
        None
    }

    /// Attribute by raw or human name, with casts applied
    pub fn get(&self, name: &str) -> Option<Value> {
        let key = self.resolve_key(name)?;
        let value = self.attributes.get(&key)?;
        Some(match self.entity_type.cast_for(&key) {
            Some(cast) => cast.cast(value),
            None => value.clone(),
        })
    }

    /// Attribute by raw or human name, as stored
    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        let key = self.resolve_key(name)?;
        self.attributes.get(&key)
    }

    /// Store under the raw column `name` translates to
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let raw = self.entity_type.translate(name);
        self.attributes.insert(raw, value.into());
    }

    pub fn fill<K: AsRef<str>, V: Into<Value>>(&mut self, values: impl IntoIterator<Item = (K, V)>) {
        for (name, value) in values {
            self.set(name.as_ref(), value);
        }
    }

    /// Remove an attribute, returning its stored value
    pub(crate) fn take_raw(&mut self, raw: &str) -> Option<Value> {
        self.original.remove(raw);
        self.attributes.remove(raw)
    }

    /// Raw-keyed attribute store
    pub fn raw_attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Attributes renamed for display, without casts
    pub fn attributes(&self) -> Map<String, Value> {
        if self.entity_type.get_options().apply_maps_on_output {
            self.entity_type.mapper().apply(self.attributes.clone())
        } else {
            self.attributes.clone()
        }
    }

    /// Serialized form: casts on raw values, then human names, then relations
    pub fn to_map(&self) -> Map<String, Value> {
        let casted: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(key, value)| {
                let value = match self.entity_type.cast_for(key) {
                    Some(cast) => cast.cast(value),
                    None => value.clone(),
                };
                (key.clone(), value)
            })
            .collect();

        let mut output = if self.entity_type.get_options().apply_maps_on_output {
            self.entity_type.mapper().apply(casted)
        } else {
            casted
        };

        for (name, related) in &self.relations {
            output.insert(name.clone(), related.to_json());
        }
        output
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_map())
    }

    pub fn original(&self) -> &Map<String, Value> {
        &self.original
    }

    /// Raw attributes that differ from the last synced state
    pub fn dirty(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(*key) != Some(*value))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty().is_empty()
    }

    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }

    pub(crate) fn mark_saved(&mut self) {
        self.exists = true;
        self.sync_original();
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relation(name).is_some()
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        let name = name.into();
        match self.relations.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = related,
            None => self.relations.push((name, related)),
        }
    }

    /// Extension row fetched by `load_extension`; `None` when not loaded or
    /// when no row exists.
    pub fn extension_data(&self, table: &str) -> Option<&Map<String, Value>> {
        self.extension_data.get(table).and_then(|row| row.as_ref())
    }

    pub(crate) fn set_extension_data(&mut self, table: &str, row: Option<Map<String, Value>>) {
        self.extension_data.insert(table.to_string(), row);
    }

    /// Remember which attributes came back under a caller alias
    pub(crate) fn mark_aliased(&mut self, aliases: &AliasTable) {
        if aliases.is_empty() {
            return;
        }
        let aliased: Vec<String> = self
            .attributes
            .keys()
            .filter(|key| aliases.resolve(key) == Some(key.as_str()))
            .cloned()
            .collect();
        self.aliased.extend(aliased);
    }

    /// Whether `raw` can be written to the base table
    fn is_base_column(&self, raw: &str) -> bool {
        !self.aliased.contains(raw) && !self.entity_type.is_extension_column(raw)
    }

    fn base_columns(&self, values: &Map<String, Value>) -> Vec<(String, Value)> {
        values
            .iter()
            .filter(|(key, _)| self.is_base_column(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Row identity for tables without a primary key: every original
    /// base-table column must still hold its loaded value. Extension columns
    /// and aliased projections are not part of the row.
    fn original_condition(&self) -> Result<Condition> {
        let mut conditions: Vec<Condition> = self
            .base_columns(&self.original)
            .into_iter()
            .map(|(column, value)| match value {
                Value::Null => Condition::is_null(column.as_str()),
                value => Condition::eq(column.as_str(), value),
            })
            .collect();
        if conditions.is_empty() {
            return Err(QueryError::Query(format!(
                "{} has no base table columns to match",
                self.entity_type.name()
            )));
        }
        Ok(if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::all(conditions)
        })
    }

    /// Insert a new entity or write the dirty attributes of a loaded one.
    ///
    /// Returns `false` when nothing needed writing or no row was affected.
    pub async fn save(&mut self, backend: &mut dyn DatabaseBackend) -> Result<bool> {
        let table = self.entity_type.table().to_string();
        let sql = if self.exists {
            let dirty = self.base_columns(&self.dirty());
            if dirty.is_empty() {
                return Ok(false);
            }
            let mut update = UpdateBuilder::new(table)
                .set_many(dirty)
                .where_clause(Some(self.original_condition()?));
            if self.entity_type.get_options().limit_updates_to_one_row {
                update = update.fetch_first(1);
            }
            update.build()?
        } else {
            let values = self.base_columns(&self.attributes);
            if values.is_empty() {
                return Ok(false);
            }
            InsertBuilder::new(table).row(values).build()?
        };

        log::debug!("Saving {}: {}", self.entity_type.name(), sql);
        let affected = backend.execute(&sql).await?;
        if affected == 0 {
            log::warn!("Save of {} affected no rows", self.entity_type.name());
            return Ok(false);
        }
        self.mark_saved();
        Ok(true)
    }

    /// Delete the row this entity was loaded from
    pub async fn delete(&mut self, backend: &mut dyn DatabaseBackend) -> Result<bool> {
        if !self.exists {
            return Ok(false);
        }
        let sql = DeleteBuilder::new(self.entity_type.table())
            .where_clause(Some(self.original_condition()?))
            .build()?;
        log::debug!("Deleting {}: {}", self.entity_type.name(), sql);
        let affected = backend.execute(&sql).await?;
        self.exists = false;
        Ok(affected > 0)
    }
}
