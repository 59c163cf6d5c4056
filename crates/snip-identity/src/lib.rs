//! Anonymous user identities and the encrypted tokens that carry them.
//!
//! Users are numbered from an in-process counter and optionally persisted to
//! a JSON-lines log. A token is the hex encoding of the user code encrypted
//! with AES-256-GCM followed by the nonce used.

mod cipher;
mod error;
mod service;

pub use cipher::{TokenCipher, NONCE_LEN};
pub use error::{IdentityError, Result};
pub use service::{IdentityService, IdentitySettings, Issued, Session};
