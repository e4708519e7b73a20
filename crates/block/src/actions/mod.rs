//! Custom action declarations and dispatch.
//!
//! Actions are declared in page front matter and dispatched by name from
//! the block state engine. Every invocation is gated by per-action
//! parameter validation; a successful invocation is followed by a block
//! refresh (driven by the caller).

pub mod exec;
pub mod http;
pub mod sql;

use std::path::Path;

use indexmap::IndexMap;
use livemark_core::{RuntimeConfig, SourceRegistry};
use serde::{Deserialize, Serialize};

use crate::{BlockError, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Sql,
    Http,
    Exec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamDecl {
    #[serde(default)]
    pub required: bool,
}

/// One declared custom action, normalized from page front matter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecl {
    pub kind: ActionKind,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub statement: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub params: IndexMap<String, ParamDecl>,
    /// Free-form prompt surfaced to the client before dispatch.
    #[serde(default)]
    pub confirm: Option<String>,
}

impl ActionDecl {
    /// Structural invariants: sql needs source+statement, http needs url,
    /// exec needs cmd.
    pub fn validate(&self, name: &str) -> Result<(), BlockError> {
        match self.kind {
            ActionKind::Sql => {
                if self.source.is_none() || self.statement.is_none() {
                    return Err(BlockError::Validation(format!(
                        "sql action '{name}' requires source and statement"
                    )));
                }
            }
            ActionKind::Http => {
                if self.url.is_none() {
                    return Err(BlockError::Validation(format!(
                        "http action '{name}' requires a url"
                    )));
                }
            }
            ActionKind::Exec => {
                if self.cmd.is_none() {
                    return Err(BlockError::Validation(format!(
                        "exec action '{name}' requires a cmd"
                    )));
                }
            }
        }
        Ok(())
    }

    /// A required parameter is missing when absent, null, or (for strings)
    /// empty.
    pub fn validate_params(&self, payload: &Payload) -> Result<(), BlockError> {
        for (name, decl) in &self.params {
            if !decl.required {
                continue;
            }
            let missing = match payload.get(name) {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) => s.is_empty(),
                Some(_) => false,
            };
            if missing {
                return Err(BlockError::MissingParam(name.clone()));
            }
        }
        Ok(())
    }
}

/// Everything a custom action needs from its surroundings.
pub struct ActionContext<'a> {
    pub registry: Option<&'a SourceRegistry>,
    pub config: &'a RuntimeConfig,
    pub site_dir: &'a Path,
    pub http: &'a reqwest::Client,
}

/// Dispatch a declared action. The caller refreshes the owning block on
/// success.
pub async fn dispatch(
    name: &str,
    decl: &ActionDecl,
    payload: &Payload,
    ctx: &ActionContext<'_>,
) -> Result<(), BlockError> {
    decl.validate(name)?;
    decl.validate_params(payload)?;
    match decl.kind {
        ActionKind::Sql => sql::run(decl, payload, ctx).await,
        ActionKind::Http => http::run(decl, payload, ctx).await,
        ActionKind::Exec => exec::run(decl, payload, ctx).await,
    }
}

/// Render a minijinja template string against the action payload.
///
/// Deliberately broader than the closed payload vocabulary in
/// [`crate::template`]: URL, body, and command templates need dotted-path
/// access to the full payload.
pub(crate) fn render_template(template: &str, payload: &Payload) -> Result<String, BlockError> {
    let env = minijinja::Environment::new();
    let ctx = minijinja::Value::from_serialize(payload);
    env.render_str(template, ctx)
        .map_err(|e| BlockError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(kind: ActionKind) -> ActionDecl {
        ActionDecl {
            kind,
            source: None,
            statement: None,
            url: None,
            method: None,
            body: None,
            cmd: None,
            params: IndexMap::new(),
            confirm: None,
        }
    }

    #[test]
    fn structural_invariants() {
        assert!(decl(ActionKind::Sql).validate("a").is_err());
        assert!(decl(ActionKind::Http).validate("a").is_err());
        assert!(decl(ActionKind::Exec).validate("a").is_err());

        let mut ok = decl(ActionKind::Sql);
        ok.source = Some("db".into());
        ok.statement = Some("DELETE FROM t".into());
        assert!(ok.validate("a").is_ok());
    }

    #[test]
    fn required_param_missing_variants() {
        let mut d = decl(ActionKind::Http);
        d.url = Some("https://example.com".into());
        d.params.insert("name".into(), ParamDecl { required: true });

        let empty = Payload::new();
        assert!(matches!(d.validate_params(&empty), Err(BlockError::MissingParam(p)) if p == "name"));

        let mut null = Payload::new();
        null.insert("name".into(), serde_json::Value::Null);
        assert!(d.validate_params(&null).is_err());

        let mut blank = Payload::new();
        blank.insert("name".into(), serde_json::json!(""));
        assert!(d.validate_params(&blank).is_err());

        let mut zero = Payload::new();
        zero.insert("name".into(), serde_json::json!(0));
        assert!(d.validate_params(&zero).is_ok());
    }

    #[test]
    fn declarations_deserialize_from_front_matter() {
        let yaml_ish = serde_json::json!({
            "kind": "sql",
            "source": "tasks",
            "statement": "UPDATE tasks SET status='done' WHERE assigned_to=:operator",
            "params": {},
            "confirm": "Mark all of your tasks done?"
        });
        let d: ActionDecl = serde_json::from_value(yaml_ish).unwrap();
        assert_eq!(d.kind, ActionKind::Sql);
        assert_eq!(d.confirm.as_deref(), Some("Mark all of your tasks done?"));
    }

    #[test]
    fn template_rendering_sees_payload_paths() {
        let mut payload = Payload::new();
        payload.insert("user".into(), serde_json::json!({"name": "ada"}));
        let out = render_template("hello {{ user.name }}", &payload).unwrap();
        assert_eq!(out, "hello ada");
    }
}
