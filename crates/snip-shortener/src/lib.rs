//! URL shortener service layer.
//!
//! Ties a storage backend, the identity service and the deletion pipeline
//! together behind [`ShortenerService`]. Core types are re-exported from
//! `snip_core`.

pub mod deletion;
pub mod error;
pub mod service;

pub use deletion::{DeleteQueue, DeleteSink, PipelineSettings, StorageSink};
pub use error::{Result, ShortenerError};
pub use service::{BatchItem, BatchResult, Shortened, ShortenerService, Stats, UserUrl};
pub use snip_core::{ErrorKind, Storage};
