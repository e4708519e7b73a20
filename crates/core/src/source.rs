//! The source port: the capability contract every data provider satisfies.
//!
//! Blocks never know which backend they are talking to. A source is a named
//! provider of ordered rows; writing, SQL execution, cache metadata, and
//! parameterized fetches are optional capabilities probed at runtime.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::SourceError;
use crate::value::{Row, Value};

/// Cache metadata passed through to the UI projection when available.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub hit: bool,
    pub age_secs: u64,
    pub ttl_secs: u64,
}

/// Builtin write verbs. The payload schema behind each verb is
/// source-defined; the core hands it through opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVerb {
    Add,
    Toggle,
    Delete,
    Update,
}

impl FromStr for WriteVerb {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "add" => Ok(WriteVerb::Add),
            "toggle" => Ok(WriteVerb::Toggle),
            "delete" => Ok(WriteVerb::Delete),
            "update" => Ok(WriteVerb::Update),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WriteVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriteVerb::Add => "add",
            WriteVerb::Toggle => "toggle",
            WriteVerb::Delete => "delete",
            WriteVerb::Update => "update",
        };
        f.write_str(s)
    }
}

/// Trait for data provider implementations.
///
/// A source's identity is its stable `name`; two bindings referring to the
/// same name on one page share the underlying instance.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Stable source name.
    fn name(&self) -> &str;

    /// Fetch the full ordered row set.
    async fn fetch(&self) -> Result<Vec<Row>, SourceError>;

    /// Whether this source accepts write verbs at all.
    fn supports_write(&self) -> bool {
        false
    }

    /// Whether writes are currently refused even if supported.
    fn is_readonly(&self) -> bool {
        true
    }

    /// Apply a write verb. Only called when [`supports_write`](Source::supports_write)
    /// is true and [`is_readonly`](Source::is_readonly) is false.
    async fn write_item(&self, verb: WriteVerb, _payload: &Row) -> Result<(), SourceError> {
        Err(SourceError::Unsupported(
            self.name().to_string(),
            format!("write verb '{verb}'"),
        ))
    }

    /// Whether this source can execute parameterized SQL statements.
    fn supports_exec(&self) -> bool {
        false
    }

    /// Execute a statement with positional arguments (SQL-capable sources).
    async fn exec(&self, _statement: &str, _args: &[Value]) -> Result<(), SourceError> {
        Err(SourceError::Unsupported(
            self.name().to_string(),
            "exec".to_string(),
        ))
    }

    /// Cache metadata for the last fetch, when the backend tracks it.
    fn cache_info(&self) -> Option<CacheInfo> {
        None
    }

    /// Parameterized fetch for exec-style sources; defaults to a plain fetch.
    async fn fetch_with_args(
        &self,
        _args: &HashMap<String, String>,
    ) -> Result<Vec<Row>, SourceError> {
        self.fetch().await
    }

    /// Release backend resources.
    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Sibling-source lookup shared by every block on a page.
///
/// Safe for concurrent lookup; registration happens while the page is being
/// assembled, lookups happen from concurrent action handlers afterward.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Source>>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own name. Re-registering replaces.
    pub fn register(&self, source: Arc<dyn Source>) {
        let mut map = self.inner.write().expect("registry lock poisoned");
        map.insert(source.name().to_string(), source);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Source>> {
        let map = self.inner.read().expect("registry lock poisoned");
        map.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let map = self.inner.read().expect("registry lock poisoned");
        map.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_verb_parse_is_case_insensitive() {
        assert_eq!("Add".parse::<WriteVerb>(), Ok(WriteVerb::Add));
        assert_eq!("TOGGLE".parse::<WriteVerb>(), Ok(WriteVerb::Toggle));
        assert_eq!("delete".parse::<WriteVerb>(), Ok(WriteVerb::Delete));
        assert_eq!("update".parse::<WriteVerb>(), Ok(WriteVerb::Update));
        assert!("upsert".parse::<WriteVerb>().is_err());
    }
}
