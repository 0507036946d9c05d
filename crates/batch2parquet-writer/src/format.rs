//! Pluggable file-format writers
//!
//! A `FileFormat` is registered per format name and opens `FormatWriter`s
//! over arbitrary byte sinks. Parquet is built in, configured for size:
//! dictionary encoding, page statistics, and page/row-group limits that keep
//! query engines happy.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WriterError};

/// Output compression codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Snappy,
    Zstd,
    Gzip,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snappy => "snappy",
            Self::Zstd => "zstd",
            Self::Gzip => "gzip",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open output file of some format.
///
/// Lifecycle: `write` zero or more times, then `close` exactly once; `close`
/// consumes the writer to enforce this.
pub trait FormatWriter: Send {
    fn write(&mut self, batch: &RecordBatch) -> Result<()>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// A file format that can open writers over arbitrary byte sinks.
pub trait FileFormat: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Filename extension including the leading dot. The default places the
    /// compression suffix after the format (`.csv.gz` convention); formats
    /// with the opposite convention override.
    fn extension(&self, compression: Option<Compression>) -> String {
        match compression {
            Some(c) => format!(".{}.{}", self.name(), c.as_str()),
            None => format!(".{}", self.name()),
        }
    }

    fn open(
        &self,
        sink: Box<dyn Write + Send>,
        schema: SchemaRef,
        compression: Option<Compression>,
    ) -> Result<Box<dyn FormatWriter>>;
}

/// Parquet file format.
#[derive(Debug, Default, Clone)]
pub struct ParquetFormat;

fn writer_properties(compression: Option<Compression>) -> WriterProperties {
    let codec = match compression {
        None => ParquetCompression::UNCOMPRESSED,
        Some(Compression::Snappy) => ParquetCompression::SNAPPY,
        Some(Compression::Zstd) => ParquetCompression::ZSTD(ZstdLevel::default()),
        Some(Compression::Gzip) => ParquetCompression::GZIP(GzipLevel::default()),
    };
    WriterProperties::builder()
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_compression(codec)
        .set_data_page_size_limit(256 * 1024)
        .set_write_batch_size(32 * 1024)
        .set_max_row_group_size(32 * 1024)
        .set_dictionary_page_size_limit(128 * 1024)
        .build()
}

struct ParquetFormatWriter {
    inner: ArrowWriter<Box<dyn Write + Send>>,
}

impl FormatWriter for ParquetFormatWriter {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.inner.write(batch)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.inner.close()?;
        Ok(())
    }
}

impl FileFormat for ParquetFormat {
    fn name(&self) -> &'static str {
        "parquet"
    }

    // Hive convention puts the codec before the format suffix.
    fn extension(&self, compression: Option<Compression>) -> String {
        match compression {
            Some(c) => format!(".{}.parquet", c.as_str()),
            None => ".parquet".to_string(),
        }
    }

    fn open(
        &self,
        sink: Box<dyn Write + Send>,
        schema: SchemaRef,
        compression: Option<Compression>,
    ) -> Result<Box<dyn FormatWriter>> {
        let props = writer_properties(compression);
        let inner = ArrowWriter::try_new(sink, schema, Some(props))?;
        Ok(Box::new(ParquetFormatWriter { inner }))
    }
}

/// File formats registered per format name.
pub struct FormatRegistry {
    formats: HashMap<String, Arc<dyn FileFormat>>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut registry = Self {
            formats: HashMap::new(),
        };
        registry.register(Arc::new(ParquetFormat));
        registry
    }
}

impl FormatRegistry {
    pub fn register(&mut self, format: Arc<dyn FileFormat>) {
        self.formats.insert(format.name().to_string(), format);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FileFormat>> {
        self.formats
            .get(name)
            .cloned()
            .ok_or_else(|| WriterError::UnknownFormat(name.to_string()))
    }
}
