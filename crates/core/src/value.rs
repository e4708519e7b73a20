use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single row fetched from a source: an ordered field → value map.
///
/// Field order is preserved because it feeds the datatable column
/// auto-discovery and the rendered projection.
pub type Row = IndexMap<String, Value>;

/// Typed field values. Source data arrives as JSON but we preserve type info.
///
/// Nested objects and arrays are carried through as [`Value::Opaque`]; the
/// projection layer walks them recursively when normalizing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Opaque(serde_json::Value),
}

impl Value {
    /// Convert a JSON value to a typed [`Value`].
    ///
    /// Numbers whose floating representation is integral are materialized
    /// as integers, so `3.0` from a JSON source compares equal to `3` from
    /// a SQL source.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        Value::Int(f as i64)
                    } else {
                        Value::Float(f)
                    }
                } else {
                    // u64 beyond i64 range: keep textual to avoid silent wrap
                    Value::Str(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Opaque(other.clone()),
        }
    }

    /// Render back to JSON for projections and push payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Opaque(v) => v.clone(),
        }
    }

    /// Numeric coercion: ints, floats, and numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Truthiness: bool itself, non-zero number, non-empty non-"false"
    /// non-"0" string. Null is false; nested structures count as truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty() && s != "false" && s != "0",
            Value::Opaque(_) => true,
        }
    }

    /// Plain-text rendering for command lines and error messages.
    /// Null renders empty.
    pub fn display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Opaque(v) => v.to_string(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Field lookup with case fallback: the literal name first, then a
/// first-char-uppercased variant. SQL sources emit lowercase keys while
/// authors capitalize in templates; both must resolve.
pub fn lookup_field<'a>(row: &'a Row, field: &str) -> Option<&'a Value> {
    if let Some(v) = row.get(field) {
        return Some(v);
    }
    let mut chars = field.chars();
    let first = chars.next()?;
    let variant: String = first.to_uppercase().chain(chars).collect();
    if variant != field {
        return row.get(variant.as_str());
    }
    None
}

/// Build a [`Row`] from a JSON object, typing each field.
pub fn row_from_json(obj: &serde_json::Map<String, serde_json::Value>) -> Row {
    obj.iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v)))
        .collect()
}

/// Test/readability helper: build a row from literal pairs.
pub fn row<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_float_becomes_int() {
        assert_eq!(Value::from_json(&serde_json::json!(3.0)), Value::Int(3));
        assert_eq!(Value::from_json(&serde_json::json!(3.5)), Value::Float(3.5));
        assert_eq!(Value::from_json(&serde_json::json!(42)), Value::Int(42));
    }

    #[test]
    fn numeric_string_coerces() {
        assert_eq!(Value::Str("12.5".into()).as_f64(), Some(12.5));
        assert_eq!(Value::Str("abc".into()).as_f64(), None);
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
    }

    #[test]
    fn truthiness_rules() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Str("yes".into()).is_truthy());
        assert!(!Value::Str("false".into()).is_truthy());
        assert!(!Value::Str("0".into()).is_truthy());
        assert!(!Value::Str("".into()).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn lookup_falls_back_to_uppercased() {
        let r = row([("Name", Value::from("alice"))]);
        assert_eq!(lookup_field(&r, "name"), Some(&Value::from("alice")));
        assert_eq!(lookup_field(&r, "Name"), Some(&Value::from("alice")));
        assert_eq!(lookup_field(&r, "missing"), None);
    }

    #[test]
    fn lookup_prefers_literal() {
        let mut r = Row::new();
        r.insert("status".into(), Value::from("low"));
        r.insert("Status".into(), Value::from("high"));
        assert_eq!(lookup_field(&r, "status"), Some(&Value::from("low")));
        assert_eq!(lookup_field(&r, "Status"), Some(&Value::from("high")));
    }

    #[test]
    fn serde_round_trip() {
        let v: Value = serde_json::from_str("3.0").unwrap();
        assert_eq!(v, Value::Int(3));
        assert_eq!(serde_json::to_string(&v).unwrap(), "3");
    }
}
