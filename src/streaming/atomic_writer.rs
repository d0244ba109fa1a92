//! Atomic file writer with automatic cleanup on failure.
//!
//! Writes to a temporary file in the same directory as the destination,
//! then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is automatically cleaned up.
//! Re-running a write to the same path therefore either leaves the old
//! content or the complete new content, never a mix.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::PipelineError;

/// An atomic writer for one destination file.
pub struct AtomicFileWriter {
    writer: BufWriter<NamedTempFile>,
    final_path: PathBuf,
}

impl AtomicFileWriter {
    /// Creates a writer targeting `final_path`, creating missing parent
    /// directories first.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Sink` if the parent directory cannot be
    /// determined or created, or the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                PipelineError::Sink(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                ))
            })?;

        fs::create_dir_all(parent_dir).map_err(|e| {
            PipelineError::Sink(format!(
                "Failed to create directory {}: {}",
                parent_dir.display(),
                e
            ))
        })?;

        let temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|e| PipelineError::Sink(format!("Failed to create temporary file: {}", e)))?;

        Ok(Self {
            writer: BufWriter::new(temp_file),
            final_path,
        })
    }

    /// Writer over the temporary file.
    pub fn writer_mut(&mut self) -> &mut BufWriter<NamedTempFile> {
        &mut self.writer
    }

    /// Writes a whole payload.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        self.writer
            .write_all(bytes)
            .map_err(|e| PipelineError::Sink(format!("Failed to write temporary file: {}", e)))
    }

    /// Flushes and atomically persists the file to the final path.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Sink` if flushing or persisting fails. On
    /// error, the temporary file is cleaned up automatically.
    pub fn finish(self) -> Result<PathBuf, PipelineError> {
        let named_temp = self.writer.into_inner().map_err(|e| {
            PipelineError::Sink(format!("Failed to flush buffer: {}", e.error()))
        })?;

        named_temp.persist(&self.final_path).map_err(|e| {
            PipelineError::Sink(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}

/// Writes `bytes` to `path` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<PathBuf, PipelineError> {
    let mut writer = AtomicFileWriter::new(path)?;
    writer.write_all(bytes)?;
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_successful_write() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("output.json");

        let result_path = write_atomic(&final_path, b"[{\"source_id\":\"a\"}]").unwrap();

        assert_eq!(result_path, final_path);
        let content = fs::read_to_string(&final_path).unwrap();
        assert_eq!(content, "[{\"source_id\":\"a\"}]");
    }

    #[test]
    fn test_missing_parent_directories_are_created() {
        let temp_dir = TempDir::new().unwrap();
        let final_path = temp_dir.path().join("bucket").join("nested").join("out");

        write_atomic(&final_path, b"data").unwrap();

        assert!(final_path.exists());
    }

    #[test]
    fn test_drop_cleanup() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("output.json");

        {
            let mut writer = AtomicFileWriter::new(&final_path).unwrap();
            writer.write_all(b"partial").unwrap();
            // Writer is dropped here without calling finish()
        }

        let entries_after: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert!(
            entries_after.is_empty(),
            "Directory should be empty after drop (temp file cleaned up)"
        );
        assert!(!final_path.exists());
    }

    #[test]
    fn test_overwrite_behavior() {
        let temp_dir = TempDir::new().unwrap();
        let final_path = temp_dir.path().join("output.json");
        fs::write(&final_path, "OLD_CONTENT").unwrap();

        write_atomic(&final_path, b"NEW").unwrap();

        assert_eq!(fs::read_to_string(&final_path).unwrap(), "NEW");
    }

    #[test]
    fn test_invalid_parent_directory() {
        #[cfg(unix)]
        {
            let result = AtomicFileWriter::new("/");
            assert!(matches!(result, Err(PipelineError::Sink(_))));
        }
    }
}
