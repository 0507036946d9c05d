//! Streaming partitioned writer
//!
//! `TableWriter::write_batches` returns a `FileStream`: an iterator that
//! pulls batches from the source one at a time, routes rows to per-partition
//! file handles, and yields finalized paths. A path is visible only once its
//! file has closed, never eagerly. On any failure every open file across all
//! partitions is closed and deleted, and the original error is yielded;
//! secondary failures during that cleanup never mask it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use batch2parquet_core::{partitions, reconcile_batch, PartitionKey, ReconcileOptions};
use tracing::{debug, warn};

use crate::config::WriteOptions;
use crate::error::{Result, WriterError};
use crate::format::{FileFormat, FormatRegistry, FormatWriter};
use crate::fs::FileSystem;
use crate::path::{partition_dir, random_filename};

/// Table schema lookup by name, optionally qualified by schema namespace and
/// catalog.
pub trait SchemaProvider: Send + Sync {
    fn table_schema(
        &self,
        table: &str,
        schema: Option<&str>,
        catalog: Option<&str>,
    ) -> Result<SchemaRef>;
}

/// A lazy, pull-driven source of record batches with an associated schema.
pub trait BatchSource {
    fn schema(&self) -> SchemaRef;
    fn next_batch(&mut self) -> Option<Result<RecordBatch>>;
}

/// In-memory batch source for callers and tests.
pub struct MemoryBatchSource {
    schema: SchemaRef,
    batches: std::vec::IntoIter<Result<RecordBatch>>,
}

impl MemoryBatchSource {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self::with_results(schema, batches.into_iter().map(Ok).collect())
    }

    /// Source that can also yield mid-stream failures.
    pub fn with_results(schema: SchemaRef, batches: Vec<Result<RecordBatch>>) -> Self {
        Self {
            schema,
            batches: batches.into_iter(),
        }
    }
}

impl BatchSource for MemoryBatchSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Option<Result<RecordBatch>> {
        self.batches.next()
    }
}

/// Streaming partition-aware writer for one destination table.
pub struct TableWriter {
    fs: Arc<dyn FileSystem>,
    table: String,
    base_dir: String,
    partition_by: Vec<String>,
    provider: Option<Arc<dyn SchemaProvider>>,
    schema: Option<SchemaRef>,
    schema_name: Option<String>,
    catalog: Option<String>,
    format: Arc<dyn FileFormat>,
    options: WriteOptions,
}

impl TableWriter {
    /// Resolves the file format named in `options` from the default
    /// registry.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        table: impl Into<String>,
        base_dir: impl Into<String>,
        options: WriteOptions,
    ) -> Result<Self> {
        let format = FormatRegistry::default().get(&options.file_format)?;
        Ok(Self {
            fs,
            table: table.into(),
            base_dir: base_dir.into(),
            partition_by: Vec::new(),
            provider: None,
            schema: None,
            schema_name: None,
            catalog: None,
            format,
            options,
        })
    }

    /// Partition output by these columns, in order.
    pub fn partition_by(mut self, keys: Vec<String>) -> Self {
        self.partition_by = keys;
        self
    }

    /// Explicit target schema; wins over any provider lookup.
    pub fn with_schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn SchemaProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Schema namespace and catalog qualifiers for the provider lookup.
    pub fn with_namespace(mut self, schema: Option<String>, catalog: Option<String>) -> Self {
        self.schema_name = schema;
        self.catalog = catalog;
        self
    }

    pub fn with_format(mut self, format: Arc<dyn FileFormat>) -> Self {
        self.format = format;
        self
    }

    /// Begin a streaming write. The returned `FileStream` lazily yields each
    /// finalized file path as its file closes.
    pub fn write_batches<S: BatchSource>(&self, source: S) -> Result<FileStream<'_, S>> {
        let (target, cast) = self.resolve_schema(&source)?;
        debug!(
            table = %self.table,
            base_dir = %self.base_dir,
            cast,
            partitions = self.partition_by.len(),
            "starting partitioned write"
        );
        Ok(FileStream {
            writer: self,
            source,
            target,
            cast,
            open: HashMap::new(),
            ready: VecDeque::new(),
            pending_err: None,
            done: false,
        })
    }

    fn resolve_schema<S: BatchSource>(&self, source: &S) -> Result<(SchemaRef, bool)> {
        if let Some(schema) = &self.schema {
            return Ok((schema.clone(), self.options.cast));
        }
        let Some(provider) = &self.provider else {
            return Ok((source.schema(), false));
        };
        match provider.table_schema(
            &self.table,
            self.schema_name.as_deref(),
            self.catalog.as_deref(),
        ) {
            Ok(schema) => Ok((schema, self.options.cast)),
            Err(WriterError::TableNotFound { table }) => {
                debug!(%table, "table schema not found, inferring from the batch source");
                Ok((source.schema(), false))
            }
            Err(e) => Err(e),
        }
    }
}

struct OpenFile {
    path: String,
    rows: usize,
    writer: Box<dyn FormatWriter>,
}

/// One streaming write invocation: registry of open per-partition handles,
/// queue of finalized paths, and the pull loop over the batch source.
pub struct FileStream<'w, S: BatchSource> {
    writer: &'w TableWriter,
    source: S,
    target: SchemaRef,
    cast: bool,
    open: HashMap<PartitionKey, OpenFile>,
    ready: VecDeque<String>,
    pending_err: Option<WriterError>,
    done: bool,
}

impl<S: BatchSource> Iterator for FileStream<'_, S> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // paths finalized before a failure are emitted ahead of it
            if let Some(path) = self.ready.pop_front() {
                return Some(Ok(path));
            }
            if let Some(e) = self.pending_err.take() {
                return Some(Err(e));
            }
            if self.done {
                return None;
            }
            match self.source.next_batch() {
                None => {
                    self.done = true;
                    if let Err(e) = self.finalize() {
                        self.fail(e);
                    }
                }
                Some(Err(e)) => self.fail(e),
                Some(Ok(batch)) => {
                    if let Err(e) = self.process(batch) {
                        self.fail(e);
                    }
                }
            }
        }
    }
}

impl<S: BatchSource> FileStream<'_, S> {
    /// Roll back open files and park the error; already-finalized paths in
    /// the ready queue still go out first.
    fn fail(&mut self, error: WriterError) {
        self.done = true;
        self.rollback();
        self.pending_err = Some(error);
    }

    fn process(&mut self, batch: RecordBatch) -> Result<()> {
        let batch = if self.cast {
            let options = ReconcileOptions {
                safe: self.writer.options.safe,
                fill_empty: self.writer.options.fill_empty,
                drop_missing: self.writer.options.drop_missing,
            };
            reconcile_batch(&batch, &self.target, options)?
        } else {
            batch
        };

        let groups = if self.writer.partition_by.is_empty() {
            vec![(PartitionKey::new(), batch)]
        } else {
            partitions(&batch, &self.writer.partition_by)?
        };
        for (key, group) in groups {
            self.route(key, group)?;
        }
        Ok(())
    }

    /// Write one partition group through its handle, rolling the file over
    /// whenever the row budget fills.
    fn route(&mut self, key: PartitionKey, mut group: RecordBatch) -> Result<()> {
        let budget = self.writer.options.max_file_rows;
        let mut file = match self.open.remove(&key) {
            Some(file) => file,
            None => self.open_file(&key, group.schema(), true)?,
        };

        // a zero budget means no rollover
        while budget > 0 && file.rows + group.num_rows() >= budget {
            let take = budget - file.rows;
            let head = group.slice(0, take);
            if let Err(e) = file.writer.write(&head) {
                self.open.insert(key, file);
                return Err(e);
            }
            let OpenFile { path, writer, .. } = file;
            if let Err(e) = writer.close() {
                // the handle is consumed; drop its file so rollback has
                // nothing left to miss
                if let Err(delete_err) = self.writer.fs.delete_file(&path) {
                    warn!(path = %path, error = %delete_err, "suppressed delete failure during rollback");
                }
                return Err(e);
            }
            debug!(path = %path, rows = budget, "rolled over output file");
            self.ready.push_back(path);
            group = group.slice(take, group.num_rows() - take);
            file = match self.open_file(&key, group.schema(), false) {
                Ok(file) => file,
                Err(e) => return Err(e),
            };
        }

        if group.num_rows() > 0 {
            if let Err(e) = file.writer.write(&group) {
                self.open.insert(key, file);
                return Err(e);
            }
            file.rows += group.num_rows();
        }
        self.open.insert(key, file);
        Ok(())
    }

    /// Lazily open a partition's output file. The first open of a partition
    /// directory truncates it iff append is disabled; rollover re-opens
    /// always append.
    fn open_file(&self, key: &PartitionKey, schema: SchemaRef, first: bool) -> Result<OpenFile> {
        let w = self.writer;
        let folder = partition_dir(&w.base_dir, key, w.fs.path_sep());
        if first && !w.options.append {
            w.fs.delete_dir_contents(&folder)?;
        }
        w.fs.create_dir_all(&folder)?;

        let filename = random_filename(&w.format.extension(w.options.compression));
        let path = format!("{}{}{}", folder, w.fs.path_sep(), filename);
        let sink = w.fs.open_output(&path)?;
        let writer = w.format.open(sink, schema, w.options.compression)?;
        debug!(path = %path, "opened output file");
        Ok(OpenFile {
            path,
            rows: 0,
            writer,
        })
    }

    /// Stream exhausted: close every handle, delete empty files, queue the
    /// rest for emission.
    fn finalize(&mut self) -> Result<()> {
        let mut first_err: Option<WriterError> = None;
        let handles: Vec<OpenFile> = self.open.drain().map(|(_, file)| file).collect();
        for file in handles {
            let OpenFile { path, rows, writer } = file;
            if first_err.is_some() {
                // a prior handle already failed; treat the rest like rollback
                if let Err(e) = writer.close() {
                    warn!(path = %path, error = %e, "suppressed close failure during cleanup");
                }
                if let Err(e) = self.writer.fs.delete_file(&path) {
                    warn!(path = %path, error = %e, "suppressed delete failure during cleanup");
                }
                continue;
            }
            match writer.close() {
                Err(e) => {
                    if let Err(delete_err) = self.writer.fs.delete_file(&path) {
                        warn!(path = %path, error = %delete_err, "suppressed delete failure during cleanup");
                    }
                    first_err = Some(e);
                }
                Ok(()) if rows == 0 => {
                    // never persist an empty file
                    match self.writer.fs.delete_file(&path) {
                        Ok(()) => debug!(path = %path, "deleted empty output file"),
                        Err(e) => first_err = Some(e),
                    }
                }
                Ok(()) => {
                    debug!(path = %path, rows, "finalized output file");
                    self.ready.push_back(path);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close and delete every open file; secondary failures are logged and
    /// swallowed so they never mask the originating error.
    fn rollback(&mut self) {
        for (_, file) in self.open.drain() {
            let OpenFile { path, writer, .. } = file;
            if let Err(e) = writer.close() {
                warn!(path = %path, error = %e, "suppressed close failure during rollback");
            }
            if let Err(e) = self.writer.fs.delete_file(&path) {
                warn!(path = %path, error = %e, "suppressed delete failure during rollback");
            }
        }
    }
}

impl<S: BatchSource> Drop for FileStream<'_, S> {
    fn drop(&mut self) {
        if !self.open.is_empty() {
            warn!(table = %self.writer.table, "write stream dropped with open files, rolling back");
            self.rollback();
        }
    }
}
