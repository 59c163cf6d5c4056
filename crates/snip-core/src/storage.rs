use crate::deadline::Deadline;
use crate::error::{Result, StorageError};
use crate::record::{UrlRecord, WriteOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// A read-only view of a storage engine.
#[async_trait]
pub trait ReadStorage: Send + Sync + 'static {
    /// Tag identifying the active backend, stamped on new users.
    fn instance_name(&self) -> &'static str;

    /// Resolves a short code to its original URL.
    ///
    /// Fails with `NotFound` for unknown codes and `Gone` for deleted ones.
    async fn read_url(&self, deadline: Deadline, short_code: &str) -> Result<String>;

    /// Lists every record owned by `owner`, deleted ones included, in creation order.
    ///
    /// Fails with `NotFound` if the user owns nothing.
    async fn user_urls(&self, deadline: Deadline, owner: i64) -> Result<Vec<UrlRecord>>;

    /// Number of distinct original URLs.
    async fn stats(&self, deadline: Deadline) -> Result<usize>;

    /// Liveness probe. Backends without an external dependency always fail
    /// with [`StorageError::NotApplicable`].
    async fn ping(&self, deadline: Deadline) -> Result<()>;
}

#[async_trait]
pub trait Storage: ReadStorage {
    /// Stores `original_url` for `owner`, or returns the existing code with `conflict` set.
    async fn write_url(
        &self,
        deadline: Deadline,
        original_url: &str,
        owner: i64,
    ) -> Result<WriteOutcome>;

    /// Batch variant of [`Storage::write_url`], keyed by original URL.
    ///
    /// Already stored URLs are returned unchanged. The batch is applied as a
    /// whole: on failure or deadline expiry nothing from it becomes visible.
    async fn write_urls(
        &self,
        deadline: Deadline,
        original_urls: &[String],
        owner: i64,
    ) -> Result<HashMap<String, UrlRecord>>;

    /// Verifies that `owner` may delete `short_codes`. Never mutates.
    async fn check_deleted_urls(
        &self,
        deadline: Deadline,
        owner: i64,
        short_codes: &[String],
    ) -> Result<()>;

    /// Marks the matching records as deleted. Unknown codes are ignored.
    async fn delete_urls(&self, deadline: Deadline, short_codes: &[String]) -> Result<()>;

    /// Releases backend resources. Safe to call more than once.
    async fn stop(&self);
}

/// Decides whether `owner` may delete the resolved `records`.
///
/// Rejects an empty resolution, any record owned by someone else, and a set
/// in which every record is already deleted. All backends route their
/// `check_deleted_urls` through here.
pub fn check_owner(owner: i64, records: &[UrlRecord]) -> Result<()> {
    debug!(owner, resolved = records.len(), "checking delete ownership");

    if records.is_empty() {
        return Err(StorageError::BadRequest(
            "nothing was found for the passed short codes".to_string(),
        ));
    }

    let forbidden: Vec<&str> = records
        .iter()
        .filter(|record| record.owner_user_id != owner)
        .map(|record| record.short_code.as_str())
        .collect();
    if !forbidden.is_empty() {
        return Err(StorageError::BadRequest(format!(
            "short codes owned by another user: {}",
            forbidden.join(", ")
        )));
    }

    if records.iter().all(|record| record.deleted) {
        let codes: Vec<&str> = records.iter().map(|r| r.short_code.as_str()).collect();
        return Err(StorageError::BadRequest(format!(
            "all short codes have already been deleted: {}",
            codes.join(", ")
        )));
    }

    Ok(())
}
