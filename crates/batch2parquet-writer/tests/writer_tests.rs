//! End-to-end writer tests against a local temp directory, read back with
//! the parquet reader.

use std::fs::File;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use batch2parquet_writer::{
    FileSystem, LocalFileSystem, MemoryBatchSource, Result, SchemaProvider, TableWriter,
    WriteOptions, WriterError,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

fn int_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
}

fn int_batch(start: i64, rows: usize) -> RecordBatch {
    let values: Vec<i64> = (start..start + rows as i64).collect();
    RecordBatch::try_new(
        int_schema(),
        vec![Arc::new(Int64Array::from(values)) as ArrayRef],
    )
    .unwrap()
}

fn day_batch(days: &[&str]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("v", DataType::Int64, false),
        Field::new("day", DataType::Utf8, false),
    ]));
    let values: Vec<i64> = (0..days.len() as i64).collect();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(values)) as ArrayRef,
            Arc::new(StringArray::from(days.to_vec())) as ArrayRef,
        ],
    )
    .unwrap()
}

fn read_rows(path: &str) -> usize {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap();
    reader.map(|b| b.unwrap().num_rows()).sum()
}

fn read_all(path: &str) -> Vec<RecordBatch> {
    ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap()
        .map(|b| b.unwrap())
        .collect()
}

fn temp_base() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("out").display().to_string();
    (dir, base)
}

#[test]
fn test_rollover_splits_on_row_budget() {
    let (_dir, base) = temp_base();
    let options = WriteOptions {
        max_file_rows: 2000,
        ..WriteOptions::default()
    };
    let writer = TableWriter::new(Arc::new(LocalFileSystem), "t", &base, options).unwrap();

    let batches: Vec<RecordBatch> = (0..10).map(|i| int_batch(i * 500, 500)).collect();
    let source = MemoryBatchSource::new(int_schema(), batches);
    let paths: Vec<String> = writer
        .write_batches(source)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

    assert_eq!(paths.len(), 3);
    let mut counts: Vec<usize> = paths.iter().map(|p| read_rows(p)).collect();
    counts.sort();
    assert_eq!(counts, vec![1000, 2000, 2000]);
    for path in &paths {
        assert!(path.ends_with(".parquet"));
    }
}

#[test]
fn test_partitioned_write_creates_hive_dirs() {
    let (_dir, base) = temp_base();
    let writer = TableWriter::new(
        Arc::new(LocalFileSystem),
        "t",
        &base,
        WriteOptions::default(),
    )
    .unwrap();
    let writer = writer.partition_by(vec!["day".to_string()]);

    let batch = day_batch(&["2024-01-01", "2024-01-02", "2024-01-01", "2024-01-03"]);
    let source = MemoryBatchSource::new(batch.schema(), vec![batch]);
    let mut paths: Vec<String> = writer
        .write_batches(source)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    paths.sort();

    assert_eq!(paths.len(), 3);
    assert!(paths[0].contains("day=2024-01-01"));
    assert!(paths[1].contains("day=2024-01-02"));
    assert!(paths[2].contains("day=2024-01-03"));
    assert_eq!(read_rows(&paths[0]), 2);
    assert_eq!(read_rows(&paths[1]), 1);
    assert_eq!(read_rows(&paths[2]), 1);
}

#[test]
fn test_source_error_rolls_back_open_files() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (_dir, base) = temp_base();
    let options = WriteOptions {
        max_file_rows: 100,
        ..WriteOptions::default()
    };
    let writer = TableWriter::new(Arc::new(LocalFileSystem), "t", &base, options).unwrap();

    // 150 rows finalizes one full file and leaves 50 rows open when the
    // source fails
    let source = MemoryBatchSource::with_results(
        int_schema(),
        vec![
            Ok(int_batch(0, 150)),
            Err(WriterError::source_failure(std::io::Error::other(
                "upstream gone",
            ))),
        ],
    );
    let results: Vec<Result<String>> = writer.write_batches(source).unwrap().collect();

    assert_eq!(results.len(), 2);
    let finalized = results[0].as_ref().unwrap().clone();
    assert!(results[1].is_err());
    assert_eq!(read_rows(&finalized), 100);

    // only the finalized file survives
    let files = LocalFileSystem.list_files(&base).unwrap();
    assert_eq!(files, vec![finalized]);
}

/// Local filesystem that refuses to open more than `limit` output files.
struct QuotaFs {
    inner: LocalFileSystem,
    opened: AtomicUsize,
    limit: usize,
}

impl QuotaFs {
    fn new(limit: usize) -> Self {
        Self {
            inner: LocalFileSystem,
            opened: AtomicUsize::new(0),
            limit,
        }
    }
}

impl FileSystem for QuotaFs {
    fn create_dir_all(&self, path: &str) -> Result<()> {
        self.inner.create_dir_all(path)
    }

    fn delete_dir_contents(&self, path: &str) -> Result<()> {
        self.inner.delete_dir_contents(path)
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        self.inner.delete_file(path)
    }

    fn open_output(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        if self.opened.fetch_add(1, Ordering::SeqCst) >= self.limit {
            return Err(WriterError::io(
                "open output",
                path,
                std::io::Error::other("quota exhausted"),
            ));
        }
        self.inner.open_output(path)
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.inner.list_files(path)
    }
}

#[test]
fn test_finalized_paths_precede_a_mid_batch_error() {
    let (_dir, base) = temp_base();
    let options = WriteOptions {
        max_file_rows: 100,
        ..WriteOptions::default()
    };
    // 250 rows roll two full files before the third open fails
    let writer = TableWriter::new(Arc::new(QuotaFs::new(2)), "t", &base, options).unwrap();
    let source = MemoryBatchSource::new(int_schema(), vec![int_batch(0, 250)]);
    let results: Vec<Result<String>> = writer.write_batches(source).unwrap().collect();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(results[2], Err(WriterError::Io { .. })));

    let mut survivors = LocalFileSystem.list_files(&base).unwrap();
    survivors.sort();
    let mut finalized: Vec<String> = results[..2]
        .iter()
        .map(|r| r.as_ref().unwrap().clone())
        .collect();
    finalized.sort();
    assert_eq!(survivors, finalized);
    assert!(finalized.iter().all(|p| read_rows(p) == 100));
}

#[test]
fn test_empty_source_writes_nothing() {
    let (_dir, base) = temp_base();
    let writer = TableWriter::new(
        Arc::new(LocalFileSystem),
        "t",
        &base,
        WriteOptions::default(),
    )
    .unwrap();

    let source = MemoryBatchSource::new(int_schema(), vec![]);
    let paths: Vec<String> = writer
        .write_batches(source)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

    assert!(paths.is_empty());
    assert!(LocalFileSystem.list_files(&base).unwrap().is_empty());
}

#[test]
fn test_truncate_replaces_previous_files() {
    let (_dir, base) = temp_base();
    let fs = Arc::new(LocalFileSystem);

    let append = TableWriter::new(fs.clone(), "t", &base, WriteOptions::default()).unwrap();
    let first: Vec<String> = append
        .write_batches(MemoryBatchSource::new(int_schema(), vec![int_batch(0, 10)]))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    let second: Vec<String> = append
        .write_batches(MemoryBatchSource::new(int_schema(), vec![int_batch(0, 10)]))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(LocalFileSystem.list_files(&base).unwrap().len(), 2);

    let options = WriteOptions {
        append: false,
        ..WriteOptions::default()
    };
    let truncate = TableWriter::new(fs, "t", &base, options).unwrap();
    let third: Vec<String> = truncate
        .write_batches(MemoryBatchSource::new(int_schema(), vec![int_batch(0, 5)]))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

    let files = LocalFileSystem.list_files(&base).unwrap();
    assert_eq!(files, third);
    assert_ne!(files, first);
    assert_ne!(files, second);
    assert_eq!(read_rows(&files[0]), 5);
}

#[test]
fn test_casts_against_explicit_schema() {
    let (_dir, base) = temp_base();
    let writer = TableWriter::new(
        Arc::new(LocalFileSystem),
        "t",
        &base,
        WriteOptions::default(),
    )
    .unwrap();

    // target reorders columns, adds a nullable fill column, and narrows the
    // string column to integers
    let target = Arc::new(Schema::new(vec![
        Field::new("extra", DataType::Utf8, true),
        Field::new("n", DataType::Int64, true),
    ]));
    let writer = writer.with_schema(target.clone());

    let source_schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Utf8, false)]));
    let batch = RecordBatch::try_new(
        source_schema.clone(),
        vec![Arc::new(StringArray::from(vec!["1", "2", "3"])) as ArrayRef],
    )
    .unwrap();

    let paths: Vec<String> = writer
        .write_batches(MemoryBatchSource::new(source_schema, vec![batch]))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(paths.len(), 1);

    let out = read_all(&paths[0]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].schema().field(0).name(), "extra");
    assert_eq!(out[0].column(0).null_count(), 3);
    let n = out[0]
        .column(1)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(n.values(), &[1, 2, 3]);
}

#[test]
fn test_unsafe_cast_failure_leaves_no_files() {
    let (_dir, base) = temp_base();
    let writer = TableWriter::new(
        Arc::new(LocalFileSystem),
        "t",
        &base,
        WriteOptions::default(),
    )
    .unwrap();
    let target = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
    let writer = writer.with_schema(target);

    let source_schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Utf8, false)]));
    let batch = RecordBatch::try_new(
        source_schema.clone(),
        vec![Arc::new(StringArray::from(vec!["1", "nope"])) as ArrayRef],
    )
    .unwrap();

    let results: Vec<Result<String>> = writer
        .write_batches(MemoryBatchSource::new(source_schema, vec![batch]))
        .unwrap()
        .collect();

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(WriterError::Convert(_))));
    assert!(LocalFileSystem.list_files(&base).unwrap().is_empty());
}

struct OneTable {
    name: &'static str,
    schema: SchemaRef,
}

impl SchemaProvider for OneTable {
    fn table_schema(
        &self,
        table: &str,
        _schema: Option<&str>,
        _catalog: Option<&str>,
    ) -> Result<SchemaRef> {
        if table == self.name {
            Ok(self.schema.clone())
        } else {
            Err(WriterError::TableNotFound {
                table: table.to_string(),
            })
        }
    }
}

#[test]
fn test_provider_schema_drives_cast() {
    let (_dir, base) = temp_base();
    let provider = Arc::new(OneTable {
        name: "known",
        schema: Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)])),
    });
    let writer = TableWriter::new(
        Arc::new(LocalFileSystem),
        "known",
        &base,
        WriteOptions::default(),
    )
    .unwrap()
    .with_provider(provider);

    let source_schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Utf8, false)]));
    let batch = RecordBatch::try_new(
        source_schema.clone(),
        vec![Arc::new(StringArray::from(vec!["7"])) as ArrayRef],
    )
    .unwrap();

    let paths: Vec<String> = writer
        .write_batches(MemoryBatchSource::new(source_schema, vec![batch]))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

    let out = read_all(&paths[0]);
    assert_eq!(out[0].schema().field(0).data_type(), &DataType::Int64);
}

#[test]
fn test_missing_table_falls_back_to_source_schema() {
    let (_dir, base) = temp_base();
    let provider = Arc::new(OneTable {
        name: "known",
        schema: int_schema(),
    });
    let writer = TableWriter::new(
        Arc::new(LocalFileSystem),
        "unknown",
        &base,
        WriteOptions::default(),
    )
    .unwrap()
    .with_provider(provider);

    let source_schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Utf8, false)]));
    let batch = RecordBatch::try_new(
        source_schema.clone(),
        vec![Arc::new(StringArray::from(vec!["as-is"])) as ArrayRef],
    )
    .unwrap();

    let paths: Vec<String> = writer
        .write_batches(MemoryBatchSource::new(source_schema, vec![batch]))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

    // written verbatim, no reconciliation
    let out = read_all(&paths[0]);
    assert_eq!(out[0].schema().field(0).data_type(), &DataType::Utf8);
}

#[test]
fn test_dropped_stream_rolls_back_open_files() {
    let (_dir, base) = temp_base();
    let options = WriteOptions {
        max_file_rows: 100,
        ..WriteOptions::default()
    };
    let writer = TableWriter::new(Arc::new(LocalFileSystem), "t", &base, options).unwrap();

    // 150 rows rolls over once: first next() yields the full file while 50
    // rows stay open, then the stream is cancelled
    let source = MemoryBatchSource::new(int_schema(), vec![int_batch(0, 150)]);
    let mut stream = writer.write_batches(source).unwrap();
    let finalized = stream.next().unwrap().unwrap();
    drop(stream);

    assert_eq!(read_rows(&finalized), 100);
    let files = LocalFileSystem.list_files(&base).unwrap();
    assert_eq!(files, vec![finalized]);
}
