//! Error types for the writer crate

use batch2parquet_core::CoreError;
use thiserror::Error;

/// Errors that can occur while resolving schemas and writing files
#[derive(Debug, Error)]
pub enum WriterError {
    /// Schema lookup missed; callers may fall back to the source's schema
    #[error("table '{table}' not found in schema provider")]
    TableNotFound {
        /// The table name
        table: String,
    },

    /// Reconciliation, cast or partition-splitting failure
    #[error(transparent)]
    Convert(#[from] CoreError),

    /// Filesystem operation failed
    #[error("{op} failed for '{path}': {source}")]
    Io {
        /// The operation that failed
        op: &'static str,
        /// The path it targeted
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file-format writer failed
    #[error("file format writer failed: {0}")]
    Format(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No file format registered under this name
    #[error("unknown file format '{0}'")]
    UnknownFormat(String),

    /// The batch source failed mid-stream
    #[error("batch source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl WriterError {
    /// Wrap a filesystem failure with the operation and path it targeted
    pub fn io(op: &'static str, path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Wrap an upstream failure from a batch source
    pub fn source_failure(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Source(Box::new(error))
    }
}

impl From<parquet::errors::ParquetError> for WriterError {
    fn from(error: parquet::errors::ParquetError) -> Self {
        Self::Format(Box::new(error))
    }
}

/// Result type alias for WriterError
pub type Result<T> = std::result::Result<T, WriterError>;
