//! Core types and traits for the snip URL shortener.
//!
//! This crate provides the code codec, record types, error taxonomy and the
//! storage contract shared by the storage backends, the identity service and
//! the shortener service.

pub mod codec;
pub mod deadline;
pub mod error;
pub mod journal;
pub mod record;
pub mod storage;

pub use codec::{CodeSpace, CodecError, URL_CODES, USER_CODES};
pub use deadline::Deadline;
pub use error::{ErrorKind, StorageError};
pub use journal::{Journal, JournalError};
pub use record::{DeleteTask, UrlRecord, UserRecord, WriteOutcome};
pub use storage::{check_owner, ReadStorage, Storage};
