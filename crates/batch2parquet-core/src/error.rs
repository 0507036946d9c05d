//! Error types for batch transformation

use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use thiserror::Error;

/// Errors raised while resolving types, reconciling schemas, casting
/// columns or splitting partitions
#[derive(Debug, Error)]
pub enum CoreError {
    /// A semantic type name has no canonical Arrow mapping
    #[error("unknown type name '{name}'")]
    UnknownType { name: String },

    /// A required target column is absent from the batch and cannot be
    /// null-filled or dropped
    #[error("cannot find column '{field}' in batch columns {available:?}, or fill with nulls")]
    MissingColumn {
        /// The target field name
        field: String,
        /// Column names present in the batch
        available: Vec<String>,
    },

    /// A cast handler failed
    #[error("cannot cast column '{field}' to {target}, safe={safe}: {source}")]
    Cast {
        /// The field being cast
        field: String,
        /// The requested target type
        target: DataType,
        /// Whether the cast ran under the safe policy
        safe: bool,
        #[source]
        source: ArrowError,
    },

    /// A partition key column is absent from the batch
    #[error("partition key '{field}' not found in batch columns {available:?}")]
    PartitionKey {
        field: String,
        available: Vec<String>,
    },

    /// Arrow kernel failure outside of a cast handler
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// Result type alias for CoreError
pub type Result<T> = std::result::Result<T, CoreError>;
