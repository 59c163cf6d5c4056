use crate::index::UrlIndex;
use crate::memory::{owned_from_index, read_from_index};
use async_trait::async_trait;
use parking_lot::RwLock;
use snip_core::error::{Result, StorageError};
use snip_core::storage::{check_owner, ReadStorage, Storage};
use snip_core::{Deadline, Journal, UrlRecord, WriteOutcome};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub const FILE_INSTANCE: &str = "file";

/// Storage backend persisted as a JSON-lines log of [`UrlRecord`]s.
///
/// Reads are served from the same in-memory index as [`crate::MemoryStorage`].
/// New records are appended to the log before they become visible. Deletes
/// rewrite the whole log from the index.
#[derive(Debug)]
pub struct FileStorage {
    index: RwLock<UrlIndex>,
    journal: Journal,
}

impl FileStorage {
    /// Opens the log at `path`, replaying it into memory. A missing file
    /// starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Journal::new(path);
        let index = UrlIndex::from_records(journal.replay::<UrlRecord>()?);

        info!(
            path = %journal.path().display(),
            urls = index.len(),
            last_id = index.last_id(),
            "file storage loaded"
        );

        Ok(Self {
            index: RwLock::new(index),
            journal,
        })
    }
}

#[async_trait]
impl ReadStorage for FileStorage {
    fn instance_name(&self) -> &'static str {
        FILE_INSTANCE
    }

    async fn read_url(&self, deadline: Deadline, short_code: &str) -> Result<String> {
        deadline.check("read_url")?;
        read_from_index(&self.index.read(), short_code)
    }

    async fn user_urls(&self, deadline: Deadline, owner: i64) -> Result<Vec<UrlRecord>> {
        deadline.check("user_urls")?;
        owned_from_index(&self.index.read(), owner)
    }

    async fn stats(&self, deadline: Deadline) -> Result<usize> {
        deadline.check("stats")?;
        Ok(self.index.read().len())
    }

    async fn ping(&self, _deadline: Deadline) -> Result<()> {
        Err(StorageError::NotApplicable(
            "file storage has no connection to ping".to_string(),
        ))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn write_url(
        &self,
        deadline: Deadline,
        original_url: &str,
        owner: i64,
    ) -> Result<WriteOutcome> {
        let mut index = self.index.write();
        let staged = index.stage(deadline, &[original_url], owner)?;
        let conflict = staged.fresh.is_empty();
        let short_code = staged
            .found
            .get(original_url)
            .map(|record| record.short_code.clone())
            .ok_or_else(|| StorageError::InvalidData(format!("'{original_url}' was not staged")))?;

        self.journal.append(&staged.fresh)?;
        index.commit(staged.fresh);

        debug!(short_code = %short_code, owner, conflict, "url written");
        Ok(WriteOutcome {
            short_code,
            conflict,
        })
    }

    async fn write_urls(
        &self,
        deadline: Deadline,
        original_urls: &[String],
        owner: i64,
    ) -> Result<HashMap<String, UrlRecord>> {
        let mut index = self.index.write();
        let staged = index.stage(deadline, original_urls, owner)?;
        deadline.check("write_urls")?;

        let created = staged.fresh.len();
        self.journal.append(&staged.fresh)?;
        index.commit(staged.fresh);

        debug!(owner, requested = original_urls.len(), created, "url batch written");
        Ok(staged.found)
    }

    async fn check_deleted_urls(
        &self,
        deadline: Deadline,
        owner: i64,
        short_codes: &[String],
    ) -> Result<()> {
        deadline.check("check_deleted_urls")?;
        let records = self.index.read().resolve(short_codes);
        check_owner(owner, &records)
    }

    async fn delete_urls(&self, deadline: Deadline, short_codes: &[String]) -> Result<()> {
        deadline.check("delete_urls")?;

        let mut index = self.index.write();
        let flipped = index.mark_deleted(short_codes);
        if flipped.is_empty() {
            debug!(requested = short_codes.len(), "nothing left to delete");
            return Ok(());
        }

        if let Err(err) = self.journal.rewrite(index.records()) {
            index.unmark_deleted(&flipped);
            warn!(
                path = %self.journal.path().display(),
                error = %err,
                "log rewrite failed, deletion rolled back"
            );
            return Err(err.into());
        }

        debug!(requested = short_codes.len(), deleted = flipped.len(), "urls deleted");
        Ok(())
    }

    async fn stop(&self) {
        debug!(path = %self.journal.path().display(), "file storage stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_core::codec::encode_url_code;
    use snip_core::ErrorKind;

    #[tokio::test]
    async fn restart_restores_records_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.jsonl");

        let storage = FileStorage::open(&path).unwrap();
        let urls = vec!["https://a.example".to_string(), "https://b.example".to_string()];
        storage.write_urls(Deadline::never(), &urls, 3).await.unwrap();
        storage.stop().await;

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.stats(Deadline::never()).await.unwrap(), 2);
        let outcome = reopened
            .write_url(Deadline::never(), "https://c.example", 3)
            .await
            .unwrap();
        assert_eq!(outcome.short_code, encode_url_code(3).unwrap());
    }

    #[tokio::test]
    async fn deletions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.jsonl");

        let storage = FileStorage::open(&path).unwrap();
        let code = storage
            .write_url(Deadline::never(), "https://a.example", 1)
            .await
            .unwrap()
            .short_code;
        storage
            .delete_urls(Deadline::never(), &[code.clone()])
            .await
            .unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        let err = reopened.read_url(Deadline::never(), &code).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Gone);
    }

    #[tokio::test]
    async fn failed_rewrite_rolls_back_the_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.jsonl");

        let storage = FileStorage::open(&path).unwrap();
        let code = storage
            .write_url(Deadline::never(), "https://a.example", 1)
            .await
            .unwrap()
            .short_code;

        // a directory in the temp file's place makes the rewrite fail
        std::fs::create_dir(path.with_extension("rewrite")).unwrap();

        let err = storage
            .delete_urls(Deadline::never(), &[code.clone()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(
            storage.read_url(Deadline::never(), &code).await.unwrap(),
            "https://a.example"
        );
    }

    #[tokio::test]
    async fn corrupt_log_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.jsonl");
        std::fs::write(&path, "{\"id\":1\n").unwrap();

        let err = FileStorage::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }
}
