use snip_core::{ErrorKind, StorageError};
use snip_identity::IdentityError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("gone: {0}")]
    Gone(String),
    /// The request was valid but there is nothing to return.
    #[error("no content: {0}")]
    NoContent(String),
    #[error("operation canceled: {0}")]
    Canceled(String),
    #[error("deletion queue is closed")]
    QueueClosed,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("identity error: {0}")]
    Identity(String),
}

impl ShortenerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShortenerError::InvalidUrl(_) | ShortenerError::BadRequest(_) => ErrorKind::BadRequest,
            ShortenerError::NotFound(_) | ShortenerError::NoContent(_) => ErrorKind::NotFound,
            ShortenerError::Gone(_) => ErrorKind::Gone,
            ShortenerError::Canceled(_) => ErrorKind::Canceled,
            ShortenerError::QueueClosed
            | ShortenerError::Storage(_)
            | ShortenerError::Identity(_) => ErrorKind::Internal,
        }
    }
}

/// Converts a StorageError to a ShortenerError.
pub(crate) fn storage_to_shortener_error(e: StorageError) -> ShortenerError {
    match e {
        StorageError::NotFound(message) => ShortenerError::NotFound(message),
        StorageError::Gone(message) => ShortenerError::Gone(message),
        StorageError::BadRequest(message) => ShortenerError::BadRequest(message),
        StorageError::Canceled(message) => ShortenerError::Canceled(message),
        other => ShortenerError::Storage(other.to_string()),
    }
}

impl From<IdentityError> for ShortenerError {
    fn from(value: IdentityError) -> Self {
        match value.kind() {
            ErrorKind::BadRequest => Self::BadRequest(value.to_string()),
            _ => Self::Identity(value.to_string()),
        }
    }
}
