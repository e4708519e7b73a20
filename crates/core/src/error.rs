use thiserror::Error;

/// Errors surfaced by source implementations through the port.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("source '{0}' is read-only")]
    Readonly(String),

    #[error("source '{0}' does not support {1}")]
    Unsupported(String, String),

    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("exec sources are disabled")]
    ExecDisabled,

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}
