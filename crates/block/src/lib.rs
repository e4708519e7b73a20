//! The per-block state engine: one reactive store per declarative
//! data-binding on a rendered page.
//!
//! A block owns the data fetched from its source, routes builtin and
//! declared custom actions under a write-then-refresh discipline, applies
//! row-level filters as a view, and exposes a normalized projection for
//! template rendering.

pub mod actions;
pub mod datatable;
pub mod filter;
pub mod projection;
pub mod state;
pub mod template;

use thiserror::Error;

pub use actions::{ActionDecl, ActionKind, ParamDecl};
pub use datatable::DataTable;
pub use filter::{apply_filter, parse_filter, BlockFilter};
pub use state::{BlockConfig, BlockMetadata, BlockState, ElementType, ExecStatus};

use livemark_core::SourceError;

/// Action payloads arrive from the push transport as JSON objects.
pub type Payload = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("source '{0}' is read-only")]
    ReadonlySource(String),

    #[error("source '{0}' does not support writes")]
    UnsupportedWrite(String),

    #[error("required parameter '{0}' is missing")]
    MissingParam(String),

    #[error("{0}")]
    Validation(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("SQL parameter error: {0}")]
    SqlParam(String),

    #[error("blocked by SSRF policy: {0}")]
    Ssrf(String),

    #[error("command rejected: {0}")]
    Shell(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("exec failed: {0}")]
    Exec(String),

    #[error("exec actions are disabled")]
    ExecDisabled,

    #[error("source '{0}' cannot execute statements")]
    ExecUnsupported(String),

    #[error("no source registry configured")]
    NoRegistry,

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("action timed out after {0}s")]
    Timeout(u64),
}
