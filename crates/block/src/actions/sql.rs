//! SQL custom actions: named-parameter rewrite and execution through an
//! exec-capable source.

use livemark_core::Value;

use super::{ActionContext, ActionDecl};
use crate::{BlockError, Payload};

const SQL_TIMEOUT_SECS: u64 = 30;

pub async fn run(
    decl: &ActionDecl,
    payload: &Payload,
    ctx: &ActionContext<'_>,
) -> Result<(), BlockError> {
    let registry = ctx.registry.ok_or(BlockError::NoRegistry)?;
    let source_name = decl
        .source
        .as_deref()
        .ok_or_else(|| BlockError::Validation("sql action requires a source".to_string()))?;
    let statement = decl
        .statement
        .as_deref()
        .ok_or_else(|| BlockError::Validation("sql action requires a statement".to_string()))?;

    let source = registry
        .lookup(source_name)
        .ok_or_else(|| BlockError::UnknownSource(source_name.to_string()))?;
    if !source.supports_exec() {
        return Err(BlockError::ExecUnsupported(source_name.to_string()));
    }

    // Ensure `:operator` placeholders always resolve.
    let mut payload = payload.clone();
    payload
        .entry("operator".to_string())
        .or_insert_with(|| serde_json::Value::String(ctx.config.operator.clone()));

    let (rewritten, args) = substitute_params(statement, &payload)?;

    tokio::time::timeout(
        std::time::Duration::from_secs(SQL_TIMEOUT_SECS),
        source.exec(&rewritten, &args),
    )
    .await
    .map_err(|_| BlockError::Timeout(SQL_TIMEOUT_SECS))??;
    Ok(())
}

/// Rewrite `:name` placeholders to positional `?` markers.
///
/// `::` is preserved verbatim (cast syntax), as is any `:` followed by a
/// non-letter (time literals like `'12:30:00'`). Parameter names start
/// with a letter and continue with letters, digits, or underscores. Absent
/// parameters are a hard error; explicit nulls are forwarded.
pub fn substitute_params(
    statement: &str,
    payload: &Payload,
) -> Result<(String, Vec<Value>), BlockError> {
    let bytes = statement.as_bytes();
    let mut out = String::with_capacity(statement.len());
    let mut args = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b':' {
            // Advance one full character.
            let ch_len = statement[i..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(1);
            out.push_str(&statement[i..i + ch_len]);
            i += ch_len;
            continue;
        }

        // `::` cast syntax.
        if i + 1 < bytes.len() && bytes[i + 1] == b':' {
            out.push_str("::");
            i += 2;
            continue;
        }

        // `:` followed by a non-letter: not a parameter.
        if i + 1 >= bytes.len() || !bytes[i + 1].is_ascii_alphabetic() {
            out.push(':');
            i += 1;
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while end < bytes.len()
            && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
        {
            end += 1;
        }
        let name = &statement[start..end];
        let value = payload
            .get(name)
            .ok_or_else(|| BlockError::SqlParam(format!("undefined parameter :{name}")))?;
        args.push(Value::from_json(value));
        out.push('?');
        i = end;
    }

    Ok((out, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn rewrites_named_params_positionally() {
        let (stmt, args) = substitute_params(
            "UPDATE tasks SET status=:status WHERE id=:id",
            &payload(&[("status", serde_json::json!("done")), ("id", serde_json::json!(1))]),
        )
        .unwrap();
        assert_eq!(stmt, "UPDATE tasks SET status=? WHERE id=?");
        assert_eq!(args, vec![Value::from("done"), Value::Int(1)]);
    }

    #[test]
    fn preserves_casts_and_time_literals() {
        let (stmt, args) = substitute_params(
            "SELECT * FROM t WHERE a=:a AND t='12:30:00' AND v::text=''",
            &payload(&[("a", serde_json::json!(1))]),
        )
        .unwrap();
        assert_eq!(stmt, "SELECT * FROM t WHERE a=? AND t='12:30:00' AND v::text=''");
        assert_eq!(args, vec![Value::Int(1)]);
    }

    #[test]
    fn undefined_parameter_is_a_hard_error() {
        let err = substitute_params("DELETE FROM t WHERE id=:id", &Payload::new()).unwrap_err();
        assert!(matches!(err, BlockError::SqlParam(_)));
        assert!(err.to_string().contains(":id"));
    }

    #[test]
    fn explicit_null_is_forwarded() {
        let (_, args) = substitute_params(
            "UPDATE t SET note=:note",
            &payload(&[("note", serde_json::Value::Null)]),
        )
        .unwrap();
        assert_eq!(args, vec![Value::Null]);
    }

    #[test]
    fn same_param_twice_produces_two_args() {
        let (stmt, args) = substitute_params(
            "SELECT * FROM t WHERE a=:x OR b=:x",
            &payload(&[("x", serde_json::json!(5))]),
        )
        .unwrap();
        assert_eq!(stmt, "SELECT * FROM t WHERE a=? OR b=?");
        assert_eq!(args, vec![Value::Int(5), Value::Int(5)]);
    }

    #[test]
    fn trailing_colon_is_preserved() {
        let (stmt, args) = substitute_params("SELECT ':'", &Payload::new()).unwrap();
        assert_eq!(stmt, "SELECT ':'");
        assert!(args.is_empty());
    }

    #[test]
    fn param_names_stop_at_punctuation() {
        let (stmt, args) = substitute_params(
            "WHERE owner=:operator)",
            &payload(&[("operator", serde_json::json!("alice"))]),
        )
        .unwrap();
        assert_eq!(stmt, "WHERE owner=?)");
        assert_eq!(args, vec![Value::from("alice")]);
    }
}
