use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A stored URL mapping.
///
/// Records are never physically removed; deletion only flips `deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Per-backend sequence value the short code was derived from.
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub owner_user_id: i64,
    #[serde(default)]
    pub deleted: bool,
}

/// An anonymous user issued by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: i64,
    /// The user code of `user_id`.
    pub user_hash: String,
    /// Which storage backend was active when the user was created.
    pub storage_instance_name: String,
}

/// Result of writing a single URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub short_code: String,
    /// `true` when the URL was already stored and no row was created.
    pub conflict: bool,
}

/// A delete request waiting for the next flush.
#[derive(Debug, Clone)]
pub struct DeleteTask {
    pub enqueued_at: Timestamp,
    pub user_id: i64,
    pub short_codes: Vec<String>,
}

impl DeleteTask {
    pub fn new(user_id: i64, short_codes: Vec<String>) -> Self {
        Self {
            enqueued_at: Timestamp::now(),
            user_id,
            short_codes,
        }
    }
}
