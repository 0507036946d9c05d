//! Schema reconciler: align a record batch to a target schema
//!
//! Reorders columns into target field order, resolves name mismatches
//! case-insensitively, synthesizes all-null columns for absent nullable
//! fields, and casts whatever still differs.

use std::sync::Arc;

use arrow::array::{new_null_array, ArrayRef, RecordBatch, RecordBatchOptions};
use arrow::datatypes::{Field, FieldRef, Fields, Schema, SchemaRef};

use crate::cast::cast_column;
use crate::error::{CoreError, Result};

/// Column resolution policy for fields absent from the batch.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Fail rather than lose data when casting.
    pub safe: bool,
    /// Synthesize an all-null column for an absent nullable field.
    pub fill_empty: bool,
    /// Omit absent fields from the output schema instead of failing.
    pub drop_missing: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            safe: true,
            fill_empty: true,
            drop_missing: false,
        }
    }
}

/// Locate a field by exact name, falling back to a case-insensitive match.
pub fn find_field<'a>(schema: &'a Schema, name: &str) -> Option<(usize, &'a FieldRef)> {
    if let Some(found) = schema.fields().find(name) {
        return Some(found);
    }
    schema
        .fields()
        .iter()
        .enumerate()
        .find(|(_, f)| f.name().eq_ignore_ascii_case(name))
}

/// Project `schema` onto the field names of `other`, keeping `schema`'s
/// metadata. With `replace_name`, matched fields take `other`'s spelling.
pub fn intersect_schemas(schema: &Schema, other: &Schema, replace_name: bool) -> Schema {
    let fields: Vec<FieldRef> = other
        .fields()
        .iter()
        .filter_map(|wanted| {
            find_field(schema, wanted.name()).map(|(_, found)| {
                if replace_name && found.name() != wanted.name() {
                    Arc::new(renamed(found, wanted.name()))
                } else {
                    found.clone()
                }
            })
        })
        .collect();
    Schema::new_with_metadata(fields, schema.metadata().clone())
}

fn renamed(field: &Field, name: &str) -> Field {
    Field::new(name, field.data_type().clone(), field.is_nullable())
        .with_metadata(field.metadata().clone())
}

/// Align `batch` to `target`: resolve each target field to a batch column
/// (exact name, then case-insensitive, then null-fill or drop per the
/// options), rebuild in target order, and cast whatever still differs. An
/// already-conforming batch only has its schema metadata refreshed.
pub fn reconcile_batch(
    batch: &RecordBatch,
    target: &SchemaRef,
    options: ReconcileOptions,
) -> Result<RecordBatch> {
    let names_match = batch.schema().fields().len() == target.fields().len()
        && batch
            .schema()
            .fields()
            .iter()
            .zip(target.fields())
            .all(|(a, b)| a.name() == b.name());

    let (working, out_schema) = if names_match {
        (batch.clone(), target.clone())
    } else {
        resolve_columns(batch, target, options)?
    };

    if structurally_equal(working.schema().fields(), out_schema.fields()) {
        // Cheap path: values untouched, metadata refreshed.
        return Ok(working.with_schema(out_schema)?);
    }

    let columns = out_schema
        .fields()
        .iter()
        .zip(working.columns())
        .map(|(field, column)| cast_column(column, field, options.safe))
        .collect::<Result<Vec<_>>>()?;
    let row_count = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(out_schema, columns, &row_count)?)
}

/// One column per target field, in target order, with the source types the
/// batch actually carries.
fn resolve_columns(
    batch: &RecordBatch,
    target: &SchemaRef,
    options: ReconcileOptions,
) -> Result<(RecordBatch, SchemaRef)> {
    let mut batch_fields: Vec<FieldRef> = Vec::with_capacity(target.fields().len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(target.fields().len());
    let mut out_fields: Vec<FieldRef> = Vec::with_capacity(target.fields().len());

    for field in target.fields() {
        match resolve_column(batch, field, options)? {
            Some((resolved, column)) => {
                batch_fields.push(resolved);
                columns.push(column);
                out_fields.push(field.clone());
            }
            None => {} // dropped
        }
    }

    let interim_schema = Arc::new(Schema::new(batch_fields));
    let row_count = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    let interim = RecordBatch::try_new_with_options(interim_schema, columns, &row_count)?;
    let out_schema = Arc::new(Schema::new_with_metadata(
        out_fields,
        target.metadata().clone(),
    ));
    Ok((interim, out_schema))
}

fn resolve_column(
    batch: &RecordBatch,
    field: &FieldRef,
    options: ReconcileOptions,
) -> Result<Option<(FieldRef, ArrayRef)>> {
    if let Some((idx, found)) = find_field(batch.schema_ref(), field.name()) {
        let resolved = if found.name() == field.name() {
            found.clone()
        } else {
            Arc::new(renamed(found, field.name()))
        };
        return Ok(Some((resolved, batch.column(idx).clone())));
    }
    if field.is_nullable() && options.fill_empty {
        let column = new_null_array(field.data_type(), batch.num_rows());
        return Ok(Some((field.clone(), column)));
    }
    if options.drop_missing {
        return Ok(None);
    }
    Err(CoreError::MissingColumn {
        field: field.name().clone(),
        available: batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect(),
    })
}

/// Name, type and nullability equality, ignoring metadata.
fn structurally_equal(a: &Fields, b: &Fields) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|(x, y)| {
            x.name() == y.name()
                && x.data_type() == y.data_type()
                && x.is_nullable() == y.is_nullable()
        })
}
