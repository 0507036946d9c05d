//! Filesystem abstraction for hierarchical byte stores
//!
//! The writer only needs a small capability set: directory creation and
//! truncation, file deletion, recursive listing, and an output byte sink.
//! `LocalFileSystem` implements it over `std::fs`; object-store backends
//! implement the same trait in their connector crates.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, WriterError};

pub trait FileSystem: Send + Sync {
    /// Path separator for this store.
    fn path_sep(&self) -> &str {
        "/"
    }

    /// Create a directory and any missing parents.
    fn create_dir_all(&self, path: &str) -> Result<()>;

    /// Remove everything under a directory. A missing directory is fine.
    fn delete_dir_contents(&self, path: &str) -> Result<()>;

    /// Delete a single file.
    fn delete_file(&self, path: &str) -> Result<()>;

    /// Open a truncating output stream at `path`.
    fn open_output(&self, path: &str) -> Result<Box<dyn Write + Send>>;

    /// All file paths under `path`, recursively. A missing directory lists
    /// as empty.
    fn list_files(&self, path: &str) -> Result<Vec<String>>;
}

/// Local disk implementation.
#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn path_sep(&self) -> &str {
        std::path::MAIN_SEPARATOR_STR
    }

    fn create_dir_all(&self, path: &str) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| WriterError::io("create directory", path, e))
    }

    fn delete_dir_contents(&self, path: &str) -> Result<()> {
        if !Path::new(path).exists() {
            return Ok(());
        }
        let entries =
            fs::read_dir(path).map_err(|e| WriterError::io("list directory", path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| WriterError::io("list directory", path, e))?;
            let entry_path = entry.path();
            let result = if entry_path.is_dir() {
                fs::remove_dir_all(&entry_path)
            } else {
                fs::remove_file(&entry_path)
            };
            result.map_err(|e| {
                WriterError::io("delete directory contents", entry_path.display().to_string(), e)
            })?;
        }
        Ok(())
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        fs::remove_file(path).map_err(|e| WriterError::io("delete file", path, e))
    }

    fn open_output(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let file = fs::File::create(path).map_err(|e| WriterError::io("open output", path, e))?;
        Ok(Box::new(file))
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        if Path::new(path).exists() {
            walk(Path::new(path), &mut files)?;
        }
        Ok(files)
    }
}

fn walk(dir: &Path, files: &mut Vec<String>) -> Result<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| WriterError::io("list directory", dir.display().to_string(), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| WriterError::io("list directory", dir.display().to_string(), e))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else {
            files.push(path.display().to_string());
        }
    }
    Ok(())
}
