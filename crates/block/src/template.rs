//! The closed template vocabulary for action payload values.
//!
//! Deliberately tiny: timestamps, the operator identity, and integer
//! arithmetic. The HTTP action's minijinja expansion is a separate,
//! broader path; the two must not leak into each other.

use chrono::Utc;

use crate::{BlockError, Payload};

/// Expand `{{…}}` tokens in one value. Values without `{{` pass through
/// unchanged.
pub fn resolve(input: &str, operator: &str) -> Result<String, BlockError> {
    if !input.contains("{{") {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| BlockError::Template(format!("unclosed '{{{{' in: {input}")))?;
        out.push_str(&expand(after[..end].trim(), operator)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Apply [`resolve`] to every string-typed value of a payload; other types
/// pass through. An unknown expansion fails the whole map.
pub fn resolve_map(payload: &Payload, operator: &str) -> Result<Payload, BlockError> {
    let mut out = Payload::new();
    for (key, value) in payload {
        let resolved = match value {
            serde_json::Value::String(s) => serde_json::Value::String(resolve(s, operator)?),
            other => other.clone(),
        };
        out.insert(key.clone(), resolved);
    }
    Ok(out)
}

fn expand(token: &str, operator: &str) -> Result<String, BlockError> {
    match token {
        "timestamp" => Ok(Utc::now().to_rfc3339()),
        "today" => Ok(Utc::now().format("%Y-%m-%d").to_string()),
        "unix" => Ok(Utc::now().timestamp().to_string()),
        ".operator" => Ok(operator.to_string()),
        other => {
            let mut parts = other.split_whitespace();
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some("add"), Some(a), Some(b), None) => arith(a, b, i64::checked_add),
                (Some("sub"), Some(a), Some(b), None) => arith(a, b, i64::checked_sub),
                _ => Err(BlockError::Template(format!(
                    "unknown template token: {{{{{other}}}}}"
                ))),
            }
        }
    }
}

fn arith(a: &str, b: &str, op: fn(i64, i64) -> Option<i64>) -> Result<String, BlockError> {
    let a: i64 = a
        .parse()
        .map_err(|_| BlockError::Template(format!("not an integer literal: {a}")))?;
    let b: i64 = b
        .parse()
        .map_err(|_| BlockError::Template(format!("not an integer literal: {b}")))?;
    let result = op(a, b).ok_or_else(|| BlockError::Template("integer overflow".to_string()))?;
    Ok(result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values_pass_through() {
        assert_eq!(resolve("hello", "alice").unwrap(), "hello");
        assert_eq!(resolve("", "alice").unwrap(), "");
    }

    #[test]
    fn operator_token() {
        assert_eq!(resolve("{{.operator}}", "alice").unwrap(), "alice");
        assert_eq!(resolve("by {{.operator}}!", "").unwrap(), "by !");
    }

    #[test]
    fn today_is_iso_date() {
        let today = resolve("{{today}}", "").unwrap();
        assert_eq!(today.len(), 10);
        assert_eq!(&today[4..5], "-");
    }

    #[test]
    fn unix_is_decimal_seconds() {
        let unix = resolve("{{unix}}", "").unwrap();
        assert!(unix.parse::<i64>().unwrap() > 1_700_000_000);
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let ts = resolve("{{timestamp}}", "").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn arithmetic_helpers() {
        assert_eq!(resolve("{{add 2 3}}", "").unwrap(), "5");
        assert_eq!(resolve("{{sub 10 4}}", "").unwrap(), "6");
        assert!(resolve("{{add 2 x}}", "").is_err());
    }

    #[test]
    fn unknown_token_fails() {
        assert!(resolve("{{nope}}", "").is_err());
        assert!(resolve("{{", "").is_err());
    }

    #[test]
    fn multiple_tokens_in_one_value() {
        let out = resolve("{{add 1 1}}-{{.operator}}", "bob").unwrap();
        assert_eq!(out, "2-bob");
    }

    #[test]
    fn resolve_map_only_touches_strings() {
        let mut payload = Payload::new();
        payload.insert("who".into(), serde_json::json!("{{.operator}}"));
        payload.insert("n".into(), serde_json::json!(7));
        payload.insert("flag".into(), serde_json::json!(true));

        let out = resolve_map(&payload, "alice").unwrap();
        assert_eq!(out["who"], serde_json::json!("alice"));
        assert_eq!(out["n"], serde_json::json!(7));
        assert_eq!(out["flag"], serde_json::json!(true));
    }

    #[test]
    fn resolve_map_fails_whole_map_on_unknown_token() {
        let mut payload = Payload::new();
        payload.insert("good".into(), serde_json::json!("fine"));
        payload.insert("bad".into(), serde_json::json!("{{mystery}}"));
        assert!(resolve_map(&payload, "").is_err());
    }
}
