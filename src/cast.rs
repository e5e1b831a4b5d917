use serde_json::Value;
use std::fmt::Debug;

/// Value conversion applied to a raw attribute when it is read or serialized.
///
/// Casts are keyed by raw column and always see the raw value; name mapping
/// happens after casting.
pub trait Cast: Debug + Send + Sync {
    fn cast(&self, raw: &Value) -> Value;
}

/// Converts numeric text (DB2 `CHAR`/`DECIMAL` columns come back as strings)
/// to an integer. Anything unparseable is returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerCast;

impl Cast for IntegerCast {
    fn cast(&self, raw: &Value) -> Value {
        match raw {
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| raw.clone()),
            Value::Number(n) if n.is_f64() => n
                .as_f64()
                .map(|f| Value::from(f.trunc() as i64))
                .unwrap_or_else(|| raw.clone()),
            other => other.clone(),
        }
    }
}

/// Casts added to every entity type for human names it maps, unless the type
/// declares its own cast for the raw column.
pub(crate) fn default_mapped_casts() -> Vec<(&'static str, std::sync::Arc<dyn Cast>)> {
    vec![("company_number", std::sync::Arc::new(IntegerCast))]
}
