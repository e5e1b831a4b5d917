//! Raw column ↔ human name translation.
//!
//! A [`NameMap`] is declared per table as an ordered list of
//! `RAW_COLUMN → human_name` entries. A [`ColumnMapper`] merges an entity's
//! base map with the maps of its extension tables and answers lookups in both
//! directions:
//!
//! ```rust
//! use mapped_query::mapping::{ColumnMapper, NameMap, NameMapper};
//!
//! let mapper = ColumnMapper::new(NameMap::from_iter([
//!     ("ICITEM", "item_number"),
//!     ("ICDESC", "description"),
//! ]));
//!
//! assert_eq!(mapper.translate("item_number"), "ICITEM");
//! assert_eq!(mapper.translate_qualified("items.description"), "items.ICDESC");
//! assert_eq!(mapper.untranslate("ICITEM"), "item_number");
//! assert_eq!(mapper.translate("not_mapped"), "not_mapped");
//! ```

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Ordered `raw column → human name` dictionary for one table.
///
/// Raw columns are unique; inserting an existing raw column replaces its human
/// name in place. Human names may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMap {
    entries: Vec<(String, String)>,
}

impl NameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, raw: impl Into<String>, human: impl Into<String>) {
        let raw = raw.into();
        let human = human.into();
        match self.entries.iter_mut().find(|(r, _)| *r == raw) {
            Some(entry) => entry.1 = human,
            None => self.entries.push((raw, human)),
        }
    }

    /// Human name for `raw`, if mapped
    pub fn human(&self, raw: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(r, _)| r == raw)
            .map(|(_, h)| h.as_str())
    }

    /// Raw columns in declaration order
    pub fn raw_columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(r, _)| r.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(r, h)| (r.as_str(), h.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R: Into<String>, H: Into<String>> FromIterator<(R, H)> for NameMap {
    fn from_iter<I: IntoIterator<Item = (R, H)>>(iter: I) -> Self {
        let mut map = NameMap::new();
        for (raw, human) in iter {
            map.insert(raw, human);
        }
        map
    }
}

impl Serialize for NameMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(r, h)| (r, h)))
    }
}

impl<'de> Deserialize<'de> for NameMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NameMapVisitor;

        impl<'de> Visitor<'de> for NameMapVisitor {
            type Value = NameMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of raw column names to human names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<NameMap, A::Error> {
                let mut map = NameMap::new();
                while let Some((raw, human)) = access.next_entry::<String, String>()? {
                    map.insert(raw, human);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(NameMapVisitor)
    }
}

/// Name translation capability.
///
/// Unmapped names always pass through unchanged, so mapping can be adopted
/// one column at a time.
pub trait NameMapper {
    /// Human name → raw column
    fn translate(&self, name: &str) -> String;

    /// Raw column → human name
    fn untranslate(&self, raw: &str) -> String;

    /// Translate only the segment after the last `.` of a qualified name.
    fn translate_qualified(&self, name: &str) -> String {
        match name.rsplit_once('.') {
            Some((qualifier, column)) => format!("{}.{}", qualifier, self.translate(column)),
            None => self.translate(name),
        }
    }

    fn translate_all<S: AsRef<str>>(&self, names: &[S]) -> Vec<String>
    where
        Self: Sized,
    {
        names
            .iter()
            .map(|n| self.translate_qualified(n.as_ref()))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct MergedIndex {
    /// raw → human, first mapping wins
    forward: HashMap<String, String>,
    /// human → raw, first raw column wins
    reverse: HashMap<String, String>,
}

/// An entity's effective name map: the base table's map followed by the maps
/// of its extension tables.
///
/// Lookups go through an index that is built lazily and dropped whenever any
/// underlying map changes.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapper {
    base: NameMap,
    extensions: Vec<(String, NameMap)>,
    index: OnceLock<MergedIndex>,
}

impl ColumnMapper {
    pub fn new(base: NameMap) -> Self {
        Self {
            base,
            extensions: Vec::new(),
            index: OnceLock::new(),
        }
    }

    pub fn base(&self) -> &NameMap {
        &self.base
    }

    pub fn extension(&self, table: &str) -> Option<&NameMap> {
        self.extensions
            .iter()
            .find(|(t, _)| t == table)
            .map(|(_, m)| m)
    }

    /// Whether any map, base or extension, has entries
    pub fn has_maps(&self) -> bool {
        !self.base.is_empty() || self.extensions.iter().any(|(_, m)| !m.is_empty())
    }

    pub fn insert(&mut self, raw: impl Into<String>, human: impl Into<String>) {
        self.base.insert(raw, human);
        self.index = OnceLock::new();
    }

    /// Merge an extension table's map after the base map and earlier extensions.
    pub fn add_extension(&mut self, table: impl Into<String>, map: NameMap) {
        let table = table.into();
        match self.extensions.iter_mut().find(|(t, _)| *t == table) {
            Some(entry) => entry.1 = map,
            None => self.extensions.push((table, map)),
        }
        self.index = OnceLock::new();
    }

    /// Whether `human` resolves to a raw column
    pub fn is_mapped(&self, human: &str) -> bool {
        self.index().reverse.contains_key(human)
    }

    fn index(&self) -> &MergedIndex {
        self.index.get_or_init(|| {
            let mut index = MergedIndex::default();
            let all = std::iter::once(&self.base).chain(self.extensions.iter().map(|(_, m)| m));
            for map in all {
                for (raw, human) in map.iter() {
                    index
                        .forward
                        .entry(raw.to_string())
                        .or_insert_with(|| human.to_string());
                    index
                        .reverse
                        .entry(human.to_string())
                        .or_insert_with(|| raw.to_string());
                }
            }
            log::trace!(
                "built column index: {} raw columns, {} human names",
                index.forward.len(),
                index.reverse.len()
            );
            index
        })
    }

    /// Rename raw keys to human names.
    ///
    /// When two keys land on the same human name the first one in row order
    /// is kept and later ones are dropped.
    pub fn apply(&self, data: Map<String, Value>) -> Map<String, Value> {
        let index = self.index();
        if index.forward.is_empty() {
            return data;
        }

        let mut mapped = Map::new();
        for (key, value) in data {
            let name = index.forward.get(&key).cloned().unwrap_or(key);
            if !mapped.contains_key(&name) {
                mapped.insert(name, value);
            }
        }
        mapped
    }
}

impl NameMapper for ColumnMapper {
    fn translate(&self, name: &str) -> String {
        self.index()
            .reverse
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn untranslate(&self, raw: &str) -> String {
        self.index()
            .forward
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }
}
