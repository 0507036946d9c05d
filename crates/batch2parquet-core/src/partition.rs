//! Partition splitter: group a batch's rows by partition key values
//!
//! Recursive by key count, one level per key. Each level filters the batch
//! with an equality mask per distinct value, so rows with a null key never
//! match and are excluded from every group (standard null semantics); the
//! exclusion is surfaced with a warning.

use std::collections::HashSet;

use arrow::array::{Array, BooleanArray, RecordBatch, Scalar};
use arrow::compute::filter_record_batch;
use arrow::compute::kernels::cmp::eq;
use arrow::util::display::array_value_to_string;
use tracing::warn;

use crate::error::{CoreError, Result};

/// Ordered partition key tuple: (field name, rendered scalar value) pairs.
///
/// Values are rendered through Arrow's display path; they serve as grouping
/// identity and as path segments, never as typed data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartitionKey(Vec<(String, String)>);

impl PartitionKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Owned copy extended by one assignment; sibling branches of the split
    /// must never observe each other's value.
    fn with(&self, name: &str, value: String) -> Self {
        let mut entries = self.0.clone();
        entries.push((name.to_string(), value));
        Self(entries)
    }
}

/// Split `batch` into one group per distinct combination of the key columns'
/// values. Groups are pairwise disjoint and, modulo rows holding a null key,
/// their union is the batch.
pub fn partitions(
    batch: &RecordBatch,
    keys: &[String],
) -> Result<Vec<(PartitionKey, RecordBatch)>> {
    let mut groups = Vec::new();
    split_level(batch, keys, PartitionKey::new(), &mut groups)?;
    Ok(groups)
}

fn split_level(
    batch: &RecordBatch,
    keys: &[String],
    accumulated: PartitionKey,
    groups: &mut Vec<(PartitionKey, RecordBatch)>,
) -> Result<()> {
    let Some((key, rest)) = keys.split_first() else {
        groups.push((accumulated, batch.clone()));
        return Ok(());
    };

    let column = batch.column_by_name(key).ok_or_else(|| CoreError::PartitionKey {
        field: key.clone(),
        available: batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect(),
    })?;
    if column.null_count() > 0 {
        warn!(
            column = %key,
            rows = column.null_count(),
            "rows with a null partition key are excluded from every partition"
        );
    }

    // Distinct values in first-appearance order. Renderings are only a
    // pre-filter; values that render apart but compare equal (negative zero
    // against zero) are settled by the claim set below.
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();
    for row in 0..column.len() {
        if column.is_null(row) {
            continue;
        }
        let rendered = array_value_to_string(column, row)?;
        if seen.insert(rendered.clone()) {
            distinct.push((row, rendered));
        }
    }

    // Each row belongs to the first value whose equality mask reaches it.
    let mut claimed = vec![false; column.len()];
    for (row, rendered) in distinct {
        if claimed[row] {
            continue;
        }
        let value = Scalar::new(column.slice(row, 1));
        let mask = eq(column, &value)?;
        let mask = BooleanArray::from_iter(mask.iter().enumerate().map(|(i, matched)| {
            let take = matched.unwrap_or(false) && !claimed[i];
            if take {
                claimed[i] = true;
            }
            Some(take)
        }));
        let group = filter_record_batch(batch, &mask)?;
        split_level(&group, rest, accumulated.with(key, rendered), groups)?;
    }
    Ok(())
}
