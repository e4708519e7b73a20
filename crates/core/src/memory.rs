//! In-memory source for tests and examples.
//!
//! Implements every optional capability of the [`Source`] port with
//! scriptable behavior: writes mutate the held rows, exec statements are
//! routed through a caller-supplied handler, and fetch/write failures can
//! be injected. The write-verb semantics here are test-support only; real
//! sources define their own payload schemas.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::SourceError;
use crate::source::{CacheInfo, Source, WriteVerb};
use crate::value::{Row, Value};

type ExecHandler = dyn Fn(&mut Vec<Row>, &str, &[Value]) -> Result<(), String> + Send + Sync;
type ArgsHandler = dyn Fn(&HashMap<String, String>) -> Vec<Row> + Send + Sync;

pub struct MemorySource {
    name: String,
    rows: Mutex<Vec<Row>>,
    writable: bool,
    readonly: bool,
    cache_info: Option<CacheInfo>,
    fail_next_fetch: Mutex<Option<String>>,
    fail_next_write: Mutex<Option<String>>,
    exec_handler: Option<Box<ExecHandler>>,
    args_handler: Option<Box<ArgsHandler>>,
    /// Statements seen by `exec`, for assertions.
    pub exec_log: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MemorySource {
    pub fn new(name: &str, rows: Vec<Row>) -> Self {
        Self {
            name: name.to_string(),
            rows: Mutex::new(rows),
            writable: false,
            readonly: true,
            cache_info: None,
            fail_next_fetch: Mutex::new(None),
            fail_next_write: Mutex::new(None),
            exec_handler: None,
            args_handler: None,
            exec_log: Mutex::new(Vec::new()),
        }
    }

    /// Accept write verbs.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self.readonly = false;
        self
    }

    /// Advertise write support but refuse writes (readonly gate testing).
    pub fn readonly(mut self) -> Self {
        self.writable = true;
        self.readonly = true;
        self
    }

    pub fn with_cache_info(mut self, info: CacheInfo) -> Self {
        self.cache_info = Some(info);
        self
    }

    /// Enable the exec capability, routing statements through `handler`.
    pub fn with_exec<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Vec<Row>, &str, &[Value]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.exec_handler = Some(Box::new(handler));
        self
    }

    /// Script `fetch_with_args` responses (exec-style sources).
    pub fn with_args_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> Vec<Row> + Send + Sync + 'static,
    {
        self.args_handler = Some(Box::new(handler));
        self
    }

    pub fn fail_next_fetch(&self, msg: &str) {
        *self.fail_next_fetch.lock().expect("lock") = Some(msg.to_string());
    }

    pub fn fail_next_write(&self, msg: &str) {
        *self.fail_next_write.lock().expect("lock") = Some(msg.to_string());
    }

    pub fn rows_snapshot(&self) -> Vec<Row> {
        self.rows.lock().expect("lock").clone()
    }

    fn find_row_index(rows: &[Row], id: &Value) -> Option<usize> {
        rows.iter()
            .position(|r| r.get("id").map(|v| v.display() == id.display()).unwrap_or(false))
    }
}

#[async_trait::async_trait]
impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Row>, SourceError> {
        if let Some(msg) = self.fail_next_fetch.lock().expect("lock").take() {
            return Err(SourceError::Unavailable(msg));
        }
        Ok(self.rows.lock().expect("lock").clone())
    }

    fn supports_write(&self) -> bool {
        self.writable
    }

    fn is_readonly(&self) -> bool {
        self.readonly
    }

    async fn write_item(&self, verb: WriteVerb, payload: &Row) -> Result<(), SourceError> {
        if let Some(msg) = self.fail_next_write.lock().expect("lock").take() {
            return Err(SourceError::Other(msg));
        }
        let mut rows = self.rows.lock().expect("lock");
        match verb {
            WriteVerb::Add => {
                rows.push(payload.clone());
                Ok(())
            }
            WriteVerb::Delete => {
                let id = payload
                    .get("id")
                    .ok_or_else(|| SourceError::Other("delete requires an id".into()))?;
                match Self::find_row_index(&rows, id) {
                    Some(idx) => {
                        rows.remove(idx);
                        Ok(())
                    }
                    None => Err(SourceError::Other(format!("no row with id {}", id.display()))),
                }
            }
            WriteVerb::Update => {
                let id = payload
                    .get("id")
                    .ok_or_else(|| SourceError::Other("update requires an id".into()))?;
                let idx = Self::find_row_index(&rows, id)
                    .ok_or_else(|| SourceError::Other(format!("no row with id {}", id.display())))?;
                for (k, v) in payload {
                    if k != "id" {
                        rows[idx].insert(k.clone(), v.clone());
                    }
                }
                Ok(())
            }
            WriteVerb::Toggle => {
                let id = payload
                    .get("id")
                    .ok_or_else(|| SourceError::Other("toggle requires an id".into()))?;
                let idx = Self::find_row_index(&rows, id)
                    .ok_or_else(|| SourceError::Other(format!("no row with id {}", id.display())))?;
                // Flip `done` when present, else the first bool field.
                let key = if rows[idx].get("done").map(|v| matches!(v, Value::Bool(_))).unwrap_or(false) {
                    Some("done".to_string())
                } else {
                    rows[idx]
                        .iter()
                        .find(|(_, v)| matches!(v, Value::Bool(_)))
                        .map(|(k, _)| k.clone())
                };
                let key = key
                    .ok_or_else(|| SourceError::Other("toggle found no boolean field".into()))?;
                if let Some(Value::Bool(b)) = rows[idx].get(&key).cloned() {
                    rows[idx].insert(key, Value::Bool(!b));
                }
                Ok(())
            }
        }
    }

    fn supports_exec(&self) -> bool {
        self.exec_handler.is_some()
    }

    async fn exec(&self, statement: &str, args: &[Value]) -> Result<(), SourceError> {
        let handler = self.exec_handler.as_ref().ok_or_else(|| {
            SourceError::Unsupported(self.name.clone(), "exec".to_string())
        })?;
        self.exec_log
            .lock()
            .expect("lock")
            .push((statement.to_string(), args.to_vec()));
        let mut rows = self.rows.lock().expect("lock");
        handler(&mut rows, statement, args).map_err(SourceError::Other)
    }

    fn cache_info(&self) -> Option<CacheInfo> {
        self.cache_info.clone()
    }

    async fn fetch_with_args(
        &self,
        args: &HashMap<String, String>,
    ) -> Result<Vec<Row>, SourceError> {
        match &self.args_handler {
            Some(handler) => {
                let produced = handler(args);
                *self.rows.lock().expect("lock") = produced.clone();
                Ok(produced)
            }
            None => self.fetch().await,
        }
    }
}
