use crate::cipher::{TokenCipher, NONCE_LEN};
use crate::error::{IdentityError, Result};
use parking_lot::RwLock;
use snip_core::codec::{decode_user_code, encode_user_code};
use snip_core::{Journal, UserRecord};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct IdentitySettings {
    #[builder(setter(into))]
    pub secret_key: String,
    /// JSON-lines log of issued users. Users are kept in memory only when unset.
    #[builder(default, setter(strip_option, into))]
    pub user_log_path: Option<PathBuf>,
    /// Stamped on every new [`UserRecord`].
    #[builder(default = "memory".to_string(), setter(into))]
    pub storage_instance_name: String,
}

/// A freshly created user and its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    pub user_id: i64,
    pub token: String,
}

/// The identity a request ends up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: i64,
    pub token: String,
    /// `true` when the presented token was missing or invalid and a new user was minted.
    pub issued: bool,
}

#[derive(Debug, Default)]
struct UserTable {
    users: HashMap<i64, UserRecord>,
    last_user_id: i64,
}

/// Issues anonymous users and verifies their tokens.
#[derive(Debug)]
pub struct IdentityService {
    cipher: TokenCipher,
    table: RwLock<UserTable>,
    journal: Option<Journal>,
    storage_instance_name: String,
}

impl IdentityService {
    /// Builds the service, replaying the user log when one is configured.
    pub fn open(settings: IdentitySettings) -> Result<Self> {
        let cipher = TokenCipher::new(&settings.secret_key)?;
        let journal = settings.user_log_path.map(Journal::new);

        let mut table = UserTable::default();
        if let Some(journal) = &journal {
            for record in journal.replay::<UserRecord>()? {
                let id = decode_user_code(&record.user_hash)?;
                if id != record.user_id {
                    return Err(IdentityError::CorruptUserLog {
                        user_id: record.user_id,
                        user_hash: record.user_hash,
                    });
                }
                table.last_user_id = table.last_user_id.max(id);
                table.users.insert(record.user_id, record);
            }
            info!(
                path = %journal.path().display(),
                users = table.users.len(),
                last_user_id = table.last_user_id,
                "user log loaded"
            );
        }

        Ok(Self {
            cipher,
            table: RwLock::new(table),
            journal,
            storage_instance_name: settings.storage_instance_name,
        })
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Creates a user with the next id. The record reaches the user log
    /// before it becomes visible.
    pub fn new_user(&self) -> Result<i64> {
        let mut table = self.table.write();
        let user_id = table.last_user_id + 1;
        let record = UserRecord {
            user_id,
            user_hash: encode_user_code(user_id)?,
            storage_instance_name: self.storage_instance_name.clone(),
        };

        if let Some(journal) = &self.journal {
            journal.append(std::slice::from_ref(&record))?;
        }

        debug!(user_id, user_hash = %record.user_hash, "user created");
        table.users.insert(user_id, record);
        table.last_user_id = user_id;
        Ok(user_id)
    }

    /// `Ok(false)` for an unknown user. A known user with another hash is an error.
    pub fn check_user(&self, user_id: i64, user_hash: &str) -> Result<bool> {
        let table = self.table.read();
        match table.users.get(&user_id) {
            None => Ok(false),
            Some(record) if record.user_hash == user_hash => Ok(true),
            Some(_) => Err(IdentityError::HashMismatch {
                user_id,
                user_hash: user_hash.to_string(),
            }),
        }
    }

    pub fn users_count(&self) -> usize {
        self.table.read().users.len()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
        self.cipher.encrypt(plaintext)
    }

    pub fn encrypt_with(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.cipher.encrypt_with(plaintext, nonce)
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        self.cipher.decrypt(ciphertext, nonce)
    }

    /// Encodes `user_id` as `hex(ciphertext || nonce)`.
    pub fn pack_token(&self, user_id: i64, nonce: &[u8; NONCE_LEN]) -> Result<String> {
        let user_hash = self
            .table
            .read()
            .users
            .get(&user_id)
            .map(|record| record.user_hash.clone())
            .ok_or(IdentityError::UnknownUser(user_id))?;

        let mut blob = self.cipher.encrypt_with(user_hash.as_bytes(), nonce)?;
        blob.extend_from_slice(nonce);
        Ok(hex::encode(blob))
    }

    /// Recovers the user id carried by `token`.
    pub fn unpack_token(&self, token: &str) -> Result<i64> {
        let blob = hex::decode(token)
            .map_err(|err| IdentityError::MalformedToken(format!("not hex: {err}")))?;
        if blob.len() <= NONCE_LEN {
            return Err(IdentityError::MalformedToken(format!(
                "{} bytes is too short",
                blob.len()
            )));
        }

        let (ciphertext, nonce) = blob.split_at(blob.len() - NONCE_LEN);
        let plaintext = self.cipher.decrypt(ciphertext, nonce)?;
        let user_hash = String::from_utf8(plaintext)
            .map_err(|_| IdentityError::MalformedToken("user code is not utf-8".to_string()))?;
        let user_id = decode_user_code(&user_hash)?;

        if !self.check_user(user_id, &user_hash)? {
            return Err(IdentityError::UnknownUser(user_id));
        }
        Ok(user_id)
    }

    /// Creates a user and a token for it.
    pub fn issue(&self) -> Result<Issued> {
        let user_id = self.new_user()?;
        let token = self.pack_token(user_id, &TokenCipher::generate_nonce())?;
        Ok(Issued { user_id, token })
    }

    /// The user carried by `token`, or `None` if it is empty or invalid.
    pub fn authenticate(&self, token: &str) -> Option<i64> {
        if token.is_empty() {
            return None;
        }
        match self.unpack_token(token) {
            Ok(user_id) => Some(user_id),
            Err(err) => {
                debug!(error = %err, "token rejected");
                None
            }
        }
    }

    /// Keeps a valid token, otherwise mints a new user.
    pub fn authenticate_or_issue(&self, token: Option<&str>) -> Result<Session> {
        if let Some(token) = token {
            if let Some(user_id) = self.authenticate(token) {
                return Ok(Session {
                    user_id,
                    token: token.to_string(),
                    issued: false,
                });
            }
        }

        let Issued { user_id, token } = self.issue()?;
        Ok(Session {
            user_id,
            token,
            issued: true,
        })
    }
}
