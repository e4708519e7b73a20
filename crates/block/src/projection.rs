//! Projection normalization.
//!
//! Template field lookup downstream is case-sensitive yet fed both
//! SQL-lowercase and author-capitalized data, so every row key is doubled
//! with a PascalCase alias (`status` ↔ `Status`, `assigned_to` ↔
//! `AssignedTo`). Integral floats collapse to integers. Normalization runs
//! once per refresh, not per render.

use livemark_core::{Row, Value};

/// Normalize a slice of rows for the rendered projection.
pub fn normalize_rows(rows: &[Row]) -> Vec<serde_json::Value> {
    rows.iter().map(normalize_row).collect()
}

/// Normalize one row: dual keys, integral-float collapse, recursive walk.
/// An existing conflicting alias is never overwritten.
pub fn normalize_row(row: &Row) -> serde_json::Value {
    let mut out = serde_json::Map::with_capacity(row.len() * 2);
    for (key, value) in row {
        let normalized = normalize_json(&value.to_json());
        let alias = pascal_case(key);
        out.insert(key.clone(), normalized.clone());
        if alias != *key && !row.contains_key(alias.as_str()) && !out.contains_key(&alias) {
            out.insert(alias, normalized);
        }
    }
    serde_json::Value::Object(out)
}

/// Recursive JSON normalization for nested mappings and sequences.
pub fn normalize_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.as_i64().is_none()
                    && f.fract() == 0.0
                    && f >= i64::MIN as f64
                    && f <= i64::MAX as f64
                {
                    return serde_json::Value::from(f as i64);
                }
            }
            value.clone()
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(normalize_json).collect())
        }
        serde_json::Value::Object(obj) => {
            let mut out = serde_json::Map::with_capacity(obj.len() * 2);
            for (key, v) in obj {
                let normalized = normalize_json(v);
                let alias = pascal_case(key);
                out.insert(key.clone(), normalized.clone());
                if alias != *key && !obj.contains_key(&alias) && !out.contains_key(&alias) {
                    out.insert(alias, normalized);
                }
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    }
}

/// `assigned_to` → `AssignedTo`, `status` → `Status`.
pub fn pascal_case(key: &str) -> String {
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use livemark_core::value::row;

    #[test]
    fn pascal_case_variants() {
        assert_eq!(pascal_case("status"), "Status");
        assert_eq!(pascal_case("assigned_to"), "AssignedTo");
        assert_eq!(pascal_case("Status"), "Status");
        assert_eq!(pascal_case("a_b_c"), "ABC");
    }

    #[test]
    fn dual_keys_agree() {
        let r = row([("status", Value::from("todo"))]);
        let out = normalize_row(&r);
        assert_eq!(out["status"], out["Status"]);
        assert_eq!(out["status"], serde_json::json!("todo"));
    }

    #[test]
    fn conflicting_alias_is_not_overwritten() {
        let mut r = Row::new();
        r.insert("status".into(), Value::from("low"));
        r.insert("Status".into(), Value::from("high"));
        let out = normalize_row(&r);
        assert_eq!(out["status"], serde_json::json!("low"));
        assert_eq!(out["Status"], serde_json::json!("high"));
    }

    #[test]
    fn integral_floats_collapse() {
        let out = normalize_json(&serde_json::json!({"count": 3.0, "ratio": 0.5}));
        assert_eq!(out["count"], serde_json::json!(3));
        assert!(out["count"].is_i64());
        assert_eq!(out["ratio"], serde_json::json!(0.5));
    }

    #[test]
    fn nested_structures_are_walked() {
        let r = row([(
            "meta",
            Value::Opaque(serde_json::json!({"created_by": "ana", "nums": [1.0, 2.5]})),
        )]);
        let out = normalize_row(&r);
        assert_eq!(out["meta"]["created_by"], out["meta"]["CreatedBy"]);
        assert_eq!(out["Meta"]["nums"][0], serde_json::json!(1));
        assert_eq!(out["meta"]["nums"][1], serde_json::json!(2.5));
    }
}
