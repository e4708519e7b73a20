//! Shared core types for livemark: the typed row model, the source port,
//! process configuration, and the in-memory test source.

pub mod config;
pub mod error;
pub mod memory;
pub mod source;
pub mod value;

pub use config::RuntimeConfig;
pub use error::SourceError;
pub use memory::MemorySource;
pub use source::{CacheInfo, Source, SourceRegistry, WriteVerb};
pub use value::{lookup_field, Row, Value};
