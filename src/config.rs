use crate::entity::EntityType;
use crate::error::Result;
use crate::extension::Extension;
use crate::mapping::NameMap;
use crate::relation::RelationDef;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-entity behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityOptions {
    /// Select only mapped columns when a query has no explicit projection
    pub auto_select_mapped: bool,
    /// Rename raw columns to human names in serialized output
    pub apply_maps_on_output: bool,
    /// Filter on the mapped `delete_code` column by default
    pub filter_active_only: bool,
    /// `delete_code` value of an active record
    pub active_delete_code: String,
    /// Filter on the mapped `company_number` column by default
    pub filter_by_company: bool,
    /// Company used by the default company filter
    pub default_company: String,
    /// Append `FETCH FIRST 1 ROW ONLY` to entity updates. Tables without
    /// primary keys are updated by matching every original column, so this
    /// keeps duplicate rows from being changed together.
    pub limit_updates_to_one_row: bool,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            auto_select_mapped: true,
            apply_maps_on_output: true,
            filter_active_only: true,
            active_delete_code: "A".to_string(),
            filter_by_company: true,
            default_company: "1".to_string(),
            limit_updates_to_one_row: true,
        }
    }
}

/// Serializable description of one entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub maps: NameMap,
    #[serde(default)]
    pub extensions: Vec<Extension>,
    #[serde(default)]
    pub options: EntityOptions,
}

impl From<EntityConfig> for EntityType {
    fn from(config: EntityConfig) -> Self {
        let mut entity = EntityType::new(config.name, config.table)
            .maps(config.maps)
            .options(config.options);
        for extension in config.extensions {
            entity = entity.extension(extension);
        }
        entity
    }
}

/// A whole schema: entity types plus the relations between them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl SchemaConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
