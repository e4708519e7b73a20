//! Per-block reactive state.
//!
//! One `BlockState` per declarative binding on a rendered page. All
//! mutation happens under the block's own write lock, held for the full
//! duration of an action including source I/O; per-block isolation means
//! only that client's own further requests queue behind it. Projections
//! take the read lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use livemark_core::{CacheInfo, Row, RuntimeConfig, Source, SourceError, SourceRegistry, Value, WriteVerb};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;

use crate::actions::{self, ActionContext, ActionDecl};
use crate::datatable::{parse_columns, DataTable, TableColumn, DEFAULT_PAGE_SIZE};
use crate::filter::{apply_filter, parse_filter};
use crate::projection::normalize_rows;
use crate::template;
use crate::{BlockError, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Div,
    Table,
    Select,
}

impl ElementType {
    fn parse(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            Some("table") => ElementType::Table,
            Some("select") => ElementType::Select,
            _ => ElementType::Div,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ElementType::Div => "div",
            ElementType::Table => "table",
            ElementType::Select => "select",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Ready,
    Running,
    Success,
    Error,
}

impl ExecStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ExecStatus::Ready => "ready",
            ExecStatus::Running => "running",
            ExecStatus::Success => "success",
            ExecStatus::Error => "error",
        }
    }
}

/// One `--flag value` pair of an exec source's command line, typed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecArg {
    pub name: String,
    pub value: ArgValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Number(f64),
    Str(String),
}

impl ArgValue {
    pub fn parse(s: &str) -> Self {
        match s {
            "true" => ArgValue::Bool(true),
            "false" => ArgValue::Bool(false),
            _ => match s.parse::<f64>() {
                Ok(n) => ArgValue::Number(n),
                Err(_) => ArgValue::Str(s.to_string()),
            },
        }
    }

    pub fn display(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            ArgValue::Str(s) => s.clone(),
        }
    }
}

/// Binding metadata parsed by the page host from the markdown element.
#[derive(Debug, Clone, Default)]
pub struct BlockMetadata {
    /// `table`, `select`, or anything else for a plain div.
    pub element: Option<String>,
    /// `"key:Label,key2:Label2"` column spec for tables.
    pub columns: Option<String>,
    /// Exec sources with `manual=true` skip the eager initial fetch.
    pub manual: bool,
    pub page_size: Option<usize>,
}

/// Source-level configuration, immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct BlockConfig {
    /// Source type tag ("sqlite", "json", "exec", …).
    pub source_type: String,
    /// Command line for exec sources (`./script --flag value …`).
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct ExecTelemetry {
    output: String,
    stderr: String,
    duration_ms: u64,
    status: Option<ExecStatus>,
    command: String,
    args: Vec<ExecArg>,
}

struct PageWiring {
    actions: IndexMap<String, ActionDecl>,
    registry: SourceRegistry,
}

struct Inner {
    data: Vec<Row>,
    error: String,
    errors: IndexMap<String, String>,
    cache_info: Option<CacheInfo>,
    exec: ExecTelemetry,
    table: Option<DataTable>,
    active_filter: String,
    page: usize,
}

pub struct BlockState {
    name: String,
    source: Arc<dyn Source>,
    source_type: String,
    element: ElementType,
    table_columns: Vec<TableColumn>,
    site_dir: PathBuf,
    current_file: String,
    page_size: usize,
    executable: String,
    runtime: Arc<RuntimeConfig>,
    http: reqwest::Client,
    wiring: OnceLock<PageWiring>,
    inner: RwLock<Inner>,
}

impl BlockState {
    /// Build a block around an already-constructed source.
    ///
    /// Performs the eager initial fetch unless the source is exec with
    /// `manual=true`; a fetch failure lands in `error` and the block is
    /// still usable. Exec-typed blocks refuse to construct when the
    /// process-wide exec permission is off.
    pub async fn new(
        name: &str,
        source: Arc<dyn Source>,
        cfg: BlockConfig,
        site_dir: impl Into<PathBuf>,
        current_file: &str,
        metadata: BlockMetadata,
        runtime: Arc<RuntimeConfig>,
    ) -> Result<Self, BlockError> {
        let is_exec = cfg.source_type == "exec";
        if is_exec && !runtime.allow_exec {
            return Err(BlockError::Source(SourceError::ExecDisabled));
        }

        let element = ElementType::parse(metadata.element.as_deref());
        let table_columns = metadata
            .columns
            .as_deref()
            .map(parse_columns)
            .unwrap_or_default();

        let (executable, exec_args, command) = match cfg.command.as_deref() {
            Some(c) => {
                let (exe, args) = parse_command(c);
                (exe, args, c.to_string())
            }
            None => (String::new(), Vec::new(), String::new()),
        };

        let state = Self {
            name: name.to_string(),
            source,
            source_type: cfg.source_type,
            element,
            table_columns,
            site_dir: site_dir.into(),
            current_file: current_file.to_string(),
            page_size: metadata.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            executable,
            runtime,
            http: reqwest::Client::new(),
            wiring: OnceLock::new(),
            inner: RwLock::new(Inner {
                data: Vec::new(),
                error: String::new(),
                errors: IndexMap::new(),
                cache_info: None,
                exec: ExecTelemetry {
                    status: is_exec.then_some(ExecStatus::Ready),
                    command,
                    args: exec_args,
                    ..ExecTelemetry::default()
                },
                table: None,
                active_filter: String::new(),
                page: 0,
            }),
        };

        if !(is_exec && metadata.manual) {
            let mut inner = state.inner.write().await;
            if let Err(e) = state.refresh_inner(&mut inner).await {
                inner.error = e.to_string();
            }
        }

        Ok(state)
    }

    /// One-time page wiring; must happen before the first `handle_action`.
    pub fn set_page_config(
        &self,
        actions: IndexMap<String, ActionDecl>,
        registry: SourceRegistry,
    ) -> Result<(), BlockError> {
        self.wiring
            .set(PageWiring { actions, registry })
            .map_err(|_| BlockError::Validation("page config already set".to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn current_file(&self) -> &str {
        &self.current_file
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Confirmation prompt for a declared action, surfaced to the client
    /// before dispatch.
    pub fn action_confirm(&self, action: &str) -> Option<String> {
        self.wiring
            .get()
            .and_then(|w| w.actions.get(action))
            .and_then(|d| d.confirm.clone())
    }

    pub async fn data(&self) -> Vec<Row> {
        self.inner.read().await.data.clone()
    }

    pub async fn error(&self) -> String {
        self.inner.read().await.error.clone()
    }

    pub async fn active_filter(&self) -> String {
        self.inner.read().await.active_filter.clone()
    }

    pub async fn exec_status(&self) -> Option<ExecStatus> {
        self.inner.read().await.exec.status
    }

    pub async fn exec_command(&self) -> String {
        self.inner.read().await.exec.command.clone()
    }

    /// Route one client action. The write lock is held for the whole
    /// action, including source I/O; errors are captured into the block's
    /// `error` field and also returned.
    pub async fn handle_action(&self, action: &str, payload: Payload) -> Result<(), BlockError> {
        let mut inner = self.inner.write().await;
        let result = self.route_action(&mut inner, action, payload).await;
        if let Err(e) = &result {
            inner.error = e.to_string();
            if let BlockError::Source(SourceError::Invalid { field, message }) = e {
                inner.errors.insert(field.clone(), message.clone());
            }
        }
        result
    }

    async fn route_action(
        &self,
        inner: &mut Inner,
        action: &str,
        payload: Payload,
    ) -> Result<(), BlockError> {
        let lower = action.to_lowercase();
        match lower.as_str() {
            "refresh" => self.refresh_inner(inner).await,
            "run" => self.run_exec(inner, payload).await,
            "filter" => {
                let expr = payload
                    .get("filter")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if !expr.is_empty() {
                    if let Err(e) = parse_filter(&expr, &self.runtime.operator) {
                        warn!(
                            block = %self.name,
                            filter = %expr,
                            error = %e,
                            "filter does not parse and will be ignored"
                        );
                    }
                }
                inner.active_filter = expr;
                Ok(())
            }
            "add" | "toggle" | "delete" | "update" => {
                let verb = lower
                    .parse::<WriteVerb>()
                    .map_err(|_| BlockError::UnknownAction(action.to_string()))?;
                self.write_and_refresh(inner, verb, payload).await
            }
            _ => {
                if lower.starts_with("sort") {
                    return self.table_sort(inner, &lower, &payload);
                }
                if lower.starts_with("nextpage") {
                    return self.table_page(inner, 1);
                }
                if lower.starts_with("prevpage") {
                    return self.table_page(inner, -1);
                }
                self.custom_action(inner, action, payload).await
            }
        }
    }

    async fn write_and_refresh(
        &self,
        inner: &mut Inner,
        verb: WriteVerb,
        payload: Payload,
    ) -> Result<(), BlockError> {
        if !self.source.supports_write() {
            return Err(BlockError::UnsupportedWrite(self.source.name().to_string()));
        }
        if self.source.is_readonly() {
            return Err(BlockError::ReadonlySource(self.source.name().to_string()));
        }

        let resolved = template::resolve_map(&payload, &self.runtime.operator)?;
        let row: Row = resolved
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();

        // A failed write aborts here; stale data stays visible.
        self.source.write_item(verb, &row).await?;
        inner.errors.clear();
        self.refresh_inner(inner).await
    }

    async fn run_exec(&self, inner: &mut Inner, payload: Payload) -> Result<(), BlockError> {
        if self.source_type != "exec" {
            return Err(BlockError::Validation(format!(
                "run is not available for {} sources",
                self.source_type
            )));
        }

        inner.exec.status = Some(ExecStatus::Running);
        let started = std::time::Instant::now();

        let result = if payload.is_empty() {
            self.source.fetch().await
        } else {
            for (key, value) in &payload {
                let raw = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => Value::from_json(other).display(),
                };
                // Checkbox semantics from HTML forms.
                let raw = if raw == "on" { "true".to_string() } else { raw };
                let parsed = ArgValue::parse(&raw);
                match inner.exec.args.iter().position(|a| a.name == *key) {
                    Some(idx) => inner.exec.args[idx].value = parsed,
                    None => inner.exec.args.push(ExecArg {
                        name: key.clone(),
                        value: parsed,
                    }),
                }
            }
            inner.exec.command = rebuild_command(&self.executable, &inner.exec.args);

            let args_map: HashMap<String, String> = inner
                .exec
                .args
                .iter()
                .map(|a| (a.name.clone(), a.value.display()))
                .collect();
            self.source.fetch_with_args(&args_map).await
        };

        inner.exec.duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(rows) => {
                inner.data = rows;
                inner.error.clear();
                inner.exec.status = Some(ExecStatus::Success);
                inner.cache_info = self.source.cache_info();
                self.rebuild_table(inner);
                Ok(())
            }
            Err(e) => {
                inner.exec.status = Some(ExecStatus::Error);
                inner.exec.stderr = e.to_string();
                Err(e.into())
            }
        }
    }

    fn table_sort(
        &self,
        inner: &mut Inner,
        lower_action: &str,
        payload: &Payload,
    ) -> Result<(), BlockError> {
        let column = payload
            .get("column")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                lower_action
                    .strip_prefix("sort")
                    .map(|s| s.trim_start_matches(['-', ':']).to_string())
                    .filter(|s| !s.is_empty())
            })
            .ok_or_else(|| BlockError::Validation("sort requires a column".to_string()))?;

        let table = inner
            .table
            .as_mut()
            .ok_or_else(|| BlockError::Validation("block has no datatable".to_string()))?;
        table.sort_by(&column);
        inner.page = table.page;
        Ok(())
    }

    fn table_page(&self, inner: &mut Inner, delta: i32) -> Result<(), BlockError> {
        let table = inner
            .table
            .as_mut()
            .ok_or_else(|| BlockError::Validation("block has no datatable".to_string()))?;
        if delta > 0 {
            table.next_page();
        } else {
            table.prev_page();
        }
        inner.page = table.page;
        Ok(())
    }

    async fn custom_action(
        &self,
        inner: &mut Inner,
        action: &str,
        payload: Payload,
    ) -> Result<(), BlockError> {
        let wiring = self
            .wiring
            .get()
            .ok_or_else(|| BlockError::UnknownAction(action.to_string()))?;
        let decl = wiring
            .actions
            .get(action)
            .or_else(|| {
                wiring
                    .actions
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(action))
                    .map(|(_, v)| v)
            })
            .ok_or_else(|| BlockError::UnknownAction(action.to_string()))?;

        let ctx = ActionContext {
            registry: Some(&wiring.registry),
            config: self.runtime.as_ref(),
            site_dir: &self.site_dir,
            http: &self.http,
        };
        actions::dispatch(action, decl, &payload, &ctx).await?;
        self.refresh_inner(inner).await
    }

    async fn refresh_inner(&self, inner: &mut Inner) -> Result<(), BlockError> {
        let rows = self.source.fetch().await?;
        inner.data = rows;
        inner.error.clear();
        inner.cache_info = self.source.cache_info();
        self.rebuild_table(inner);
        Ok(())
    }

    fn rebuild_table(&self, inner: &mut Inner) {
        if self.element == ElementType::Table {
            let table = DataTable::build(&inner.data, &self.table_columns, inner.page, self.page_size);
            inner.page = table.page;
            inner.table = Some(table);
        }
    }

    /// The normalized render map. `data` is replaced with the
    /// filter-applied view when a filter is active; unparseable filters
    /// degrade to the unfiltered view with a warning.
    pub async fn projection(&self) -> serde_json::Value {
        let inner = self.inner.read().await;

        let filtered: Option<Vec<Row>> = if inner.active_filter.is_empty() {
            None
        } else {
            match parse_filter(&inner.active_filter, &self.runtime.operator) {
                Ok(f) => Some(apply_filter(&f, &inner.data)),
                Err(e) => {
                    warn!(
                        block = %self.name,
                        filter = %inner.active_filter,
                        error = %e,
                        "unparseable filter; showing unfiltered data"
                    );
                    None
                }
            }
        };
        let rows = filtered.as_deref().unwrap_or(&inner.data);

        let mut map = serde_json::Map::new();
        map.insert("name".to_string(), json!(self.name));
        map.insert("source_name".to_string(), json!(self.source.name()));
        map.insert("source_type".to_string(), json!(self.source_type));
        map.insert("element".to_string(), json!(self.element.label()));
        map.insert("data".to_string(), json!(normalize_rows(rows)));
        map.insert("error".to_string(), json!(inner.error));
        map.insert("errors".to_string(), json!(inner.errors));
        map.insert("active_filter".to_string(), json!(inner.active_filter));

        if let Some(ci) = &inner.cache_info {
            map.insert("cache_info".to_string(), json!(ci));
        }

        if let Some(status) = inner.exec.status {
            map.insert("status".to_string(), json!(status.label()));
            map.insert("command".to_string(), json!(inner.exec.command));
            map.insert("output".to_string(), json!(inner.exec.output));
            map.insert("stderr".to_string(), json!(inner.exec.stderr));
            map.insert("duration_ms".to_string(), json!(inner.exec.duration_ms));
            map.insert(
                "args".to_string(),
                json!(inner
                    .exec
                    .args
                    .iter()
                    .map(|a| json!({"name": a.name, "value": a.value.display()}))
                    .collect::<Vec<_>>()),
            );
        }

        if let Some(table) = &inner.table {
            map.insert(
                "table".to_string(),
                json!({
                    "columns": table.columns,
                    "rows": table.page_rows(),
                    "row_count": table.row_count(),
                    "page": table.page,
                    "page_count": table.page_count(),
                }),
            );
        }

        if let Some(wiring) = self.wiring.get() {
            if !wiring.actions.is_empty() {
                let decls: serde_json::Map<String, serde_json::Value> = wiring
                    .actions
                    .iter()
                    .map(|(name, d)| {
                        (
                            name.clone(),
                            json!({"kind": d.kind, "confirm": d.confirm}),
                        )
                    })
                    .collect();
                map.insert("actions".to_string(), serde_json::Value::Object(decls));
            }
        }

        serde_json::Value::Object(map)
    }
}

/// Split an exec command line into the executable and typed `--flag value`
/// pairs.
fn parse_command(cmd: &str) -> (String, Vec<ExecArg>) {
    let mut words = cmd.split_whitespace();
    let executable = words.next().unwrap_or("").to_string();
    let mut args = Vec::new();
    let mut words = words.peekable();
    while let Some(word) = words.next() {
        if let Some(name) = word.strip_prefix("--") {
            let value = match words.peek() {
                Some(next) if !next.starts_with("--") => words
                    .next()
                    .map(ArgValue::parse)
                    .unwrap_or(ArgValue::Bool(true)),
                _ => ArgValue::Bool(true),
            };
            args.push(ExecArg {
                name: name.to_string(),
                value,
            });
        }
    }
    (executable, args)
}

fn rebuild_command(executable: &str, args: &[ExecArg]) -> String {
    let mut out = executable.to_string();
    for arg in args {
        out.push_str(" --");
        out.push_str(&arg.name);
        out.push(' ');
        out.push_str(&arg.value.display());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing_types_args() {
        let (exe, args) = parse_command("./script --count 3 --verbose --name job");
        assert_eq!(exe, "./script");
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].value, ArgValue::Number(3.0));
        assert_eq!(args[1].value, ArgValue::Bool(true));
        assert_eq!(args[2].value, ArgValue::Str("job".to_string()));
    }

    #[test]
    fn command_rebuild_round_trips() {
        let (exe, args) = parse_command("./script --count 3");
        assert_eq!(rebuild_command(&exe, &args), "./script --count 3");
    }

    #[test]
    fn element_parse_defaults_to_div() {
        assert_eq!(ElementType::parse(Some("table")), ElementType::Table);
        assert_eq!(ElementType::parse(Some("select")), ElementType::Select);
        assert_eq!(ElementType::parse(Some("widget")), ElementType::Div);
        assert_eq!(ElementType::parse(None), ElementType::Div);
    }

    #[test]
    fn arg_value_display() {
        assert_eq!(ArgValue::parse("3").display(), "3");
        assert_eq!(ArgValue::parse("3.5").display(), "3.5");
        assert_eq!(ArgValue::parse("true").display(), "true");
        assert_eq!(ArgValue::parse("abc").display(), "abc");
    }
}
