use serde_json::{Map, Value};
use std::hash::{Hash, Hasher};

/// Ordered key values of one row, comparable across rows.
///
/// Equality and hashing use a length-prefixed encoding (`3:ABC1:1`), so no
/// combination of values can collide with another the way a delimiter-joined
/// string can. Values are compared by their text: `"1"` and `1` are the same
/// key, since legacy CHAR and DECIMAL columns often hold the same data.
#[derive(Debug, Clone)]
pub struct CompositeKey {
    values: Vec<Value>,
    encoded: String,
}

impl CompositeKey {
    /// `None` when any component is null; such keys never match.
    pub fn new(values: Vec<Value>) -> Option<Self> {
        let mut encoded = String::new();
        for value in &values {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
                other => other.to_string(),
            };
            encoded.push_str(&text.len().to_string());
            encoded.push(':');
            encoded.push_str(&text);
        }
        Some(Self { values, encoded })
    }

    /// Read `columns` from a raw attribute map. Column names are matched
    /// exactly first, then case-insensitively.
    pub fn from_attributes(attributes: &Map<String, Value>, columns: &[String]) -> Option<Self> {
        let values = columns
            .iter()
            .map(|column| {
                attributes
                    .get(column)
                    .or_else(|| {
                        attributes
                            .iter()
                            .find(|(name, _)| name.eq_ignore_ascii_case(column))
                            .map(|(_, v)| v)
                    })
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();
        Self::new(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PartialEq for CompositeKey {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for CompositeKey {}

impl Hash for CompositeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}
