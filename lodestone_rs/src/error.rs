//! Error taxonomy for the index core.
//!
//! Extraction failures never surface here: a file that fails to parse or a
//! compiler subprocess that dies contributes an empty result and a
//! `tracing::warn!`. These variants are the errors that do reach callers,
//! mostly from the store and query layers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A query ran before any index was built.
    #[error("no index found at {}. Run `lode index` first.", .0.display())]
    NoIndex(PathBuf),

    /// The on-disk manifest was written by an incompatible version.
    #[error("index schema version {found} is incompatible with {current}; a full rebuild is required")]
    SchemaVersionMismatch { found: String, current: String },

    /// The CLI/MCP boundary received a query type this engine does not know.
    #[error("unknown query type `{0}`")]
    UnknownQueryType(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed index data: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
