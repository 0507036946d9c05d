// batch2parquet-writer - Streaming partition-aware file writer
//
// Pulls record batches from a lazy source, reconciles them against a target
// schema, splits them into partition groups, and writes each group to
// hive-style partition directories with a per-file row budget. Files are
// finalized incrementally; on failure every open file is rolled back so no
// partial or empty file survives.

pub mod config;
pub mod error;
pub mod format;
pub mod fs;
pub mod path;
pub mod writer;

pub use config::WriteOptions;
pub use error::{Result, WriterError};
pub use format::{Compression, FileFormat, FormatRegistry, FormatWriter, ParquetFormat};
pub use fs::{FileSystem, LocalFileSystem};
pub use writer::{BatchSource, FileStream, MemoryBatchSource, SchemaProvider, TableWriter};
