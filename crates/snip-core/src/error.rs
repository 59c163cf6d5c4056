use crate::codec::CodecError;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Coarse classification shared by every error the core surfaces.
///
/// Transport layers map these onto status codes; the core never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Gone,
    BadRequest,
    Canceled,
    Internal,
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("operation canceled: {0}")]
    Canceled(String),
    #[error("not applicable: {0}")]
    NotApplicable(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("code generation failed: {0}")]
    Codec(#[from] CodecError),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Gone(_) => ErrorKind::Gone,
            StorageError::BadRequest(_) => ErrorKind::BadRequest,
            StorageError::Canceled(_) => ErrorKind::Canceled,
            StorageError::NotApplicable(_)
            | StorageError::Unavailable(_)
            | StorageError::Query(_)
            | StorageError::InvalidData(_)
            | StorageError::Io(_)
            | StorageError::Codec(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(StorageError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(StorageError::Gone("x".into()).kind(), ErrorKind::Gone);
        assert_eq!(
            StorageError::BadRequest("x".into()).kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(StorageError::Canceled("x".into()).kind(), ErrorKind::Canceled);
        assert_eq!(StorageError::Io("disk".into()).kind(), ErrorKind::Internal);
        assert_eq!(
            StorageError::from(CodecError::BelowOffset("0".into())).kind(),
            ErrorKind::Internal
        );
    }
}
