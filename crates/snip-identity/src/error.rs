use snip_core::{CodecError, ErrorKind, JournalError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("secret key must not be empty")]
    MissingSecret,
    #[error("user {user_id} is known under a different hash than '{user_hash}'")]
    HashMismatch { user_id: i64, user_hash: String },
    #[error("unknown user {0}")]
    UnknownUser(i64),
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("nonce must be {expected} bytes, got {actual}")]
    InvalidNonce { expected: usize, actual: usize },
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("invalid user code: {0}")]
    Codec(#[from] CodecError),
    #[error("user log entry for user {user_id} carries hash '{user_hash}' of another user")]
    CorruptUserLog { user_id: i64, user_hash: String },
    #[error("user log: {0}")]
    Journal(#[from] JournalError),
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::HashMismatch { .. }
            | IdentityError::UnknownUser(_)
            | IdentityError::MalformedToken(_)
            | IdentityError::InvalidNonce { .. }
            | IdentityError::Decrypt
            | IdentityError::Codec(_) => ErrorKind::BadRequest,
            IdentityError::MissingSecret
            | IdentityError::Encrypt
            | IdentityError::CorruptUserLog { .. }
            | IdentityError::Journal(_) => ErrorKind::Internal,
        }
    }
}
