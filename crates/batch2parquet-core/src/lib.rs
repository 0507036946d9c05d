// batch2parquet-core - Pure batch transformation logic
//
// This crate contains the I/O-free half of the pipeline: mapping semantic
// type declarations to canonical Arrow types, aligning record batches to a
// target schema, casting columns under a safety policy, and splitting
// batches into partition groups. No filesystem, no runtime dependencies.

pub mod cast;
pub mod error;
pub mod partition;
pub mod reconcile;
pub mod types;

pub use cast::cast_column;
pub use error::{CoreError, Result};
pub use partition::{partitions, PartitionKey};
pub use reconcile::{find_field, intersect_schemas, reconcile_batch, ReconcileOptions};
pub use types::{parse_type_decl, resolve_type, SqlTypeName};
