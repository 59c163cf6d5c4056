use crate::index::UrlIndex;
use async_trait::async_trait;
use parking_lot::RwLock;
use snip_core::error::{Result, StorageError};
use snip_core::storage::{check_owner, ReadStorage, Storage};
use snip_core::{Deadline, UrlRecord, WriteOutcome};
use std::collections::HashMap;
use tracing::debug;

pub const MEMORY_INSTANCE: &str = "memory";

/// Volatile storage backend. Contents are lost when the process exits.
///
/// All indexes sit behind one lock, so a batch write or a delete is observed
/// either entirely or not at all.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    index: RwLock<UrlIndex>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn read_from_index(index: &UrlIndex, short_code: &str) -> Result<String> {
    match index.get_by_code(short_code) {
        None => Err(StorageError::NotFound(format!(
            "short code '{short_code}' is unknown"
        ))),
        Some(record) if record.deleted => Err(StorageError::Gone(format!(
            "short code '{short_code}' was deleted"
        ))),
        Some(record) => Ok(record.original_url.clone()),
    }
}

pub(crate) fn owned_from_index(index: &UrlIndex, owner: i64) -> Result<Vec<UrlRecord>> {
    let records = index.owned_by(owner);
    if records.is_empty() {
        return Err(StorageError::NotFound(format!(
            "user {owner} has no stored urls"
        )));
    }
    Ok(records)
}

#[async_trait]
impl ReadStorage for MemoryStorage {
    fn instance_name(&self) -> &'static str {
        MEMORY_INSTANCE
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
            "memory storage has no connection to ping".to_string(),
        ))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
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
        let created = staged.fresh.len();
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
        let flipped = self.index.write().mark_deleted(short_codes);
        debug!(requested = short_codes.len(), deleted = flipped.len(), "urls deleted");
        Ok(())
    }

    async fn stop(&self) {}
}
