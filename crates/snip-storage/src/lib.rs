//! Storage backends for the snip URL shortener.
//!
//! Three implementations of [`snip_core::Storage`] live here: a volatile
//! [`MemoryStorage`], a JSON-lines backed [`FileStorage`] and a
//! [`PostgresStorage`]. [`open`] picks one from [`StorageSettings`].

mod index;

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use snip_core::error::{Result, StorageError};
pub use snip_core::storage::{ReadStorage, Storage};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use typed_builder::TypedBuilder;

/// Where URL records are kept.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct StorageSettings {
    /// PostgreSQL DSN. Takes precedence over everything else.
    #[builder(default, setter(strip_option, into))]
    pub database_dsn: Option<String>,
    /// Path of the URL log used when no DSN is set.
    #[builder(default, setter(strip_option, into))]
    pub file_path: Option<PathBuf>,
}

/// Opens the backend selected by `settings`: PostgreSQL when a DSN is set,
/// otherwise the file log when a path is set, otherwise memory.
pub async fn open(settings: &StorageSettings) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match (&settings.database_dsn, &settings.file_path) {
        (Some(dsn), _) if !dsn.trim().is_empty() => Arc::new(PostgresStorage::connect(dsn).await?),
        (_, Some(path)) if !path.as_os_str().is_empty() => Arc::new(FileStorage::open(path)?),
        _ => Arc::new(MemoryStorage::new()),
    };

    info!(instance = storage.instance_name(), "storage opened");
    Ok(storage)
}
