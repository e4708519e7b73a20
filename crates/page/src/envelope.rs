//! Wire types shared with the push transport.
//!
//! Client → server and server → client messages share one envelope shape:
//! `{blockID, action, data}`. Expression results ride under a sentinel
//! block id; `reload` with no block id asks the client to reload the page.

use indexmap::IndexMap;
use livemark_block::Payload;
use livemark_expr::ExprOutcome;
use serde::{Deserialize, Serialize};

/// Sentinel block id carrying expression slot updates.
pub const EXPRESSIONS_BLOCK_ID: &str = "__expressions__";
pub const EXPR_UPDATE_ACTION: &str = "expr-update";
pub const RELOAD_ACTION: &str = "reload";
/// Action name of a per-block state push.
pub const STATE_ACTION: &str = "state";

/// A client action as received from the push transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEnvelope {
    #[serde(rename = "blockID", default)]
    pub block_id: String,
    pub action: String,
    #[serde(default)]
    pub data: Payload,
}

/// A server push, envelope-shaped for symmetry with [`ActionEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "blockID", default, skip_serializing_if = "String::is_empty")]
    pub block_id: String,
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PushMessage {
    /// A block's refreshed projection.
    pub fn block_state(block_id: &str, projection: serde_json::Value) -> Self {
        Self {
            block_id: block_id.to_string(),
            action: STATE_ACTION.to_string(),
            data: projection,
        }
    }

    /// Re-evaluated expression slots: `exprID → value | {error}`.
    pub fn expr_update(values: &IndexMap<String, ExprOutcome>) -> Self {
        Self {
            block_id: EXPRESSIONS_BLOCK_ID.to_string(),
            action: EXPR_UPDATE_ACTION.to_string(),
            data: serde_json::to_value(values).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Source-file change: the client should reload the page.
    pub fn reload() -> Self {
        Self {
            block_id: String::new(),
            action: RELOAD_ACTION.to_string(),
            data: serde_json::Value::Null,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livemark_core::Value;

    #[test]
    fn envelope_deserializes_wire_shape() {
        let env: ActionEnvelope = serde_json::from_str(
            r#"{"blockID": "tasks", "action": "toggle", "data": {"id": 1}}"#,
        )
        .unwrap();
        assert_eq!(env.block_id, "tasks");
        assert_eq!(env.action, "toggle");
        assert_eq!(env.data["id"], serde_json::json!(1));
    }

    #[test]
    fn envelope_data_defaults_to_empty() {
        let env: ActionEnvelope =
            serde_json::from_str(r#"{"blockID": "tasks", "action": "refresh"}"#).unwrap();
        assert!(env.data.is_empty());
    }

    #[test]
    fn expr_update_carries_sentinel() {
        let mut values = IndexMap::new();
        values.insert("e1".to_string(), ExprOutcome::Value(Value::Int(3)));
        values.insert(
            "e4".to_string(),
            ExprOutcome::Error("source 'missing' not found".to_string()),
        );

        let msg = PushMessage::expr_update(&values);
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["blockID"], serde_json::json!("__expressions__"));
        assert_eq!(json["action"], serde_json::json!("expr-update"));
        assert_eq!(json["data"]["e1"], serde_json::json!(3));
        assert_eq!(
            json["data"]["e4"]["error"],
            serde_json::json!("source 'missing' not found")
        );
    }

    #[test]
    fn reload_has_no_block_id() {
        let json: serde_json::Value =
            serde_json::from_str(&PushMessage::reload().to_json()).unwrap();
        assert_eq!(json["action"], serde_json::json!("reload"));
        assert!(json.get("blockID").is_none());
    }
}
