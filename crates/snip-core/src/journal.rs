//! Newline-delimited JSON record logs.
//!
//! Used by the file storage backend for URL records and by the identity
//! service for user records. Appends are flushed and synced before they
//! return; rewrites go through a sibling temp file and a rename.

use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

pub type Result<T> = std::result::Result<T, JournalError>;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal i/o failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("journal {path} line {line} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode journal entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An append-only JSON-lines file.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Reads every entry in file order. A missing file is an empty journal.
    pub fn replay<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "journal does not exist yet");
                return Ok(Vec::new());
            }
            Err(err) => return Err(self.io_err(err)),
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.io_err(e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|source| JournalError::Corrupt {
                path: self.path.clone(),
                line: index + 1,
                source,
            })?;
            entries.push(entry);
        }

        debug!(path = %self.path.display(), entries = entries.len(), "journal replayed");
        Ok(entries)
    }

    /// Appends `entries` with a single write and syncs the file.
    pub fn append<T: Serialize>(&self, entries: &[T]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let buf = encode_lines(entries.iter())?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        file.write_all(&buf).map_err(|e| self.io_err(e))?;
        file.sync_data().map_err(|e| self.io_err(e))?;

        trace!(path = %self.path.display(), entries = entries.len(), "journal appended");
        Ok(())
    }

    /// Replaces the whole journal with `entries`.
    pub fn rewrite<'a, T, I>(&self, entries: I) -> Result<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let buf = encode_lines(entries)?;

        let tmp = self.path.with_extension("rewrite");
        let mut file = File::create(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(&buf).map_err(|e| self.io_err(e))?;
        file.sync_data().map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        debug!(path = %self.path.display(), bytes = buf.len(), "journal rewritten");
        Ok(())
    }
}

fn encode_lines<'a, T, I>(entries: I) -> Result<Vec<u8>>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut buf = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut buf, entry)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

impl From<JournalError> for StorageError {
    fn from(err: JournalError) -> Self {
        match err {
            JournalError::Io { .. } => StorageError::Io(err.to_string()),
            JournalError::Corrupt { .. } | JournalError::Encode(_) => {
                StorageError::InvalidData(err.to_string())
            }
        }
    }
}
