//! Where study rows go.
//!
//! A session only needs to open a file, write records, flush and close.
//! [`CsvFileStorage`] does that on disk with the `csv` crate;
//! [`MemoryStorage`] keeps rows in memory and can be told to fail.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors raised by a study's storage.
#[derive(Debug, Error)]
pub enum StudyError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StudyError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An open row sink for one study.
pub trait RowWriter: Send {
    /// Append one record.
    fn write_record(&mut self, fields: &[&str]) -> Result<(), StudyError>;

    fn flush(&mut self) -> Result<(), StudyError>;

    /// Flush and release the underlying file.
    fn close(self: Box<Self>) -> Result<(), StudyError>;
}

/// Opens [`RowWriter`]s.
pub trait StudyStorage: Send + Sync + std::fmt::Debug {
    /// Create or truncate `path`, creating parent directories as needed.
    fn open_for_write(&self, path: &Path) -> Result<Box<dyn RowWriter>, StudyError>;
}

/// CSV files on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFileStorage;

impl StudyStorage for CsvFileStorage {
    fn open_for_write(&self, path: &Path) -> Result<Box<dyn RowWriter>, StudyError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StudyError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| StudyError::io(path, e))?;
        debug!(path = %path.display(), "study file opened");
        Ok(Box::new(CsvRowWriter {
            path: path.to_path_buf(),
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file),
        }))
    }
}

struct CsvRowWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl RowWriter for CsvRowWriter {
    fn write_record(&mut self, fields: &[&str]) -> Result<(), StudyError> {
        self.writer
            .write_record(fields)
            .map_err(|source| StudyError::Csv {
                path: self.path.clone(),
                source,
            })
    }

    fn flush(&mut self) -> Result<(), StudyError> {
        self.writer
            .flush()
            .map_err(|e| StudyError::io(&self.path, e))
    }

    fn close(self: Box<Self>) -> Result<(), StudyError> {
        let path = self.path;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| StudyError::io(&path, e.into_error()))?;
        file.sync_all().map_err(|e| StudyError::io(&path, e))?;
        debug!(path = %path.display(), "study file closed");
        Ok(())
    }
}

type Files = Arc<Mutex<HashMap<PathBuf, Vec<Vec<String>>>>>;

/// In-memory storage. Rows become visible on flush, like a buffered file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Files,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushed records of `path`, header included.
    pub fn records(&self, path: &Path) -> Vec<Vec<String>> {
        self.files.lock().get(path).cloned().unwrap_or_default()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().keys().cloned().collect()
    }

    /// Make every subsequent write and flush fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl StudyStorage for MemoryStorage {
    fn open_for_write(&self, path: &Path) -> Result<Box<dyn RowWriter>, StudyError> {
        self.files.lock().insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemoryRowWriter {
            path: path.to_path_buf(),
            pending: Vec::new(),
            files: Arc::clone(&self.files),
            fail_writes: Arc::clone(&self.fail_writes),
        }))
    }
}

struct MemoryRowWriter {
    path: PathBuf,
    pending: Vec<Vec<String>>,
    files: Files,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryRowWriter {
    fn check(&self) -> Result<(), StudyError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StudyError::Unavailable(format!(
                "writes to {} disabled",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl RowWriter for MemoryRowWriter {
    fn write_record(&mut self, fields: &[&str]) -> Result<(), StudyError> {
        self.check()?;
        self.pending
            .push(fields.iter().map(|f| f.to_string()).collect());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StudyError> {
        self.check()?;
        let mut files = self.files.lock();
        files
            .entry(self.path.clone())
            .or_default()
            .append(&mut self.pending);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), StudyError> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_csv_storage_creates_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("study.csv");

        let mut writer = CsvFileStorage.open_for_write(&path).unwrap();
        writer.write_record(&["a", "b"]).unwrap();
        writer.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n");

        let mut writer = CsvFileStorage.open_for_write(&path).unwrap();
        writer.write_record(&["c", "d"]).unwrap();
        writer.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "c,d\n");
    }

    #[test]
    fn test_csv_storage_quotes_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quoted.csv");

        let mut writer = CsvFileStorage.open_for_write(&path).unwrap();
        writer.write_record(&["gauge, left", "1"]).unwrap();
        writer.close().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "\"gauge, left\",1\n"
        );
    }

    #[test]
    fn test_memory_storage_flush_visibility() {
        let storage = MemoryStorage::new();
        let path = PathBuf::from("mem.csv");
        let mut writer = storage.open_for_write(&path).unwrap();

        writer.write_record(&["x"]).unwrap();
        assert!(storage.records(&path).is_empty());
        writer.flush().unwrap();
        assert_eq!(storage.records(&path), vec![vec!["x".to_string()]]);
    }

    #[test]
    fn test_memory_storage_failure() {
        let storage = MemoryStorage::new();
        let mut writer = storage.open_for_write(Path::new("mem.csv")).unwrap();
        storage.set_fail_writes(true);
        assert!(matches!(
            writer.write_record(&["x"]),
            Err(StudyError::Unavailable(_))
        ));
    }
}
