//! Write options
//!
//! Deserializable from TOML with per-field defaults so partial config files
//! work; environment-specific wiring lives in connector crates.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::format::Compression;

/// Options for one table write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Row budget per output file; reaching it rolls the file over.
    #[serde(default = "default_max_file_rows")]
    pub max_file_rows: usize,

    /// Reconcile each batch against the target schema before writing.
    #[serde(default = "default_true")]
    pub cast: bool,

    /// Fail rather than lose data when casting.
    #[serde(default = "default_true")]
    pub safe: bool,

    /// Null-fill absent nullable target columns.
    #[serde(default = "default_true")]
    pub fill_empty: bool,

    /// Drop absent target columns instead of failing.
    #[serde(default)]
    pub drop_missing: bool,

    /// Keep existing partition directory contents; disabling truncates each
    /// partition directory the first time it is opened.
    #[serde(default = "default_true")]
    pub append: bool,

    /// Output compression codec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,

    /// Registered file format name.
    #[serde(default = "default_file_format")]
    pub file_format: String,
}

fn default_max_file_rows() -> usize {
    4 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_file_format() -> String {
    "parquet".to_string()
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            max_file_rows: default_max_file_rows(),
            cast: true,
            safe: true,
            fill_empty: true,
            drop_missing: false,
            append: true,
            compression: None,
            file_format: default_file_format(),
        }
    }
}

impl WriteOptions {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("failed to parse write options")
    }

    pub fn from_toml_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read write options from {path}"))?;
        Self::from_toml_str(&content)
    }
}
