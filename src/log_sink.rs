//! Append-only chat log.
//!
//! Every append opens the file, writes one record with a single write
//! call, and closes it again. No handle is held between records and no
//! lock is taken, so concurrent sessions rely on `O_APPEND` for line
//! atomicity.

use crate::error::LogError;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Default log file, relative to the server's working directory.
pub const DEFAULT_LOG_FILE: &str = "chat_log.txt";

/// Handle to the shared chat log. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. `line` should already carry its trailing newline.
    pub async fn append(&self, line: &str) -> Result<(), LogError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| LogError::Open(self.path.clone(), e))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| LogError::Write(self.path.clone(), e))?;
        file.flush()
            .await
            .map_err(|e| LogError::Write(self.path.clone(), e))?;

        Ok(())
    }
}
