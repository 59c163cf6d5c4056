use crate::error::{IdentityError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

/// Size of an AES-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM keyed with the SHA-256 digest of an operator secret.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(IdentityError::MissingSecret);
        }
        let key = Sha256::digest(secret.as_bytes());
        Ok(Self {
            cipher: Aes256Gcm::new(&key),
        })
    }

    /// Returns a fresh random nonce.
    pub fn generate_nonce() -> [u8; NONCE_LEN] {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut out = [0u8; NONCE_LEN];
        out.copy_from_slice(nonce.as_slice());
        out
    }

    /// Encrypts under a fresh nonce and returns the ciphertext with it.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
        let nonce = Self::generate_nonce();
        let ciphertext = self.encrypt_with(plaintext, &nonce)?;
        Ok((ciphertext, nonce))
    }

    pub fn encrypt_with(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce.as_slice()), plaintext)
            .map_err(|_| IdentityError::Encrypt)
    }

    /// Fails on a nonce of the wrong size and on any authentication failure.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            return Err(IdentityError::InvalidNonce {
                expected: NONCE_LEN,
                actual: nonce.len(),
            });
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| IdentityError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = TokenCipher::new("s3cret").unwrap();
        let (ciphertext, nonce) = cipher.encrypt(b"5ighna").unwrap();
        assert_ne!(ciphertext.as_slice(), b"5ighna");
        assert_eq!(cipher.decrypt(&ciphertext, &nonce).unwrap(), b"5ighna");
    }

    #[test]
    fn fixed_nonce_is_deterministic() {
        let cipher = TokenCipher::new("s3cret").unwrap();
        let nonce = [7u8; NONCE_LEN];
        assert_eq!(
            cipher.encrypt_with(b"abc", &nonce).unwrap(),
            cipher.encrypt_with(b"abc", &nonce).unwrap()
        );
    }

    #[test]
    fn tampering_is_detected() {
        let cipher = TokenCipher::new("s3cret").unwrap();
        let (mut ciphertext, nonce) = cipher.encrypt(b"5ighna").unwrap();
        ciphertext[0] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&ciphertext, &nonce),
            Err(IdentityError::Decrypt)
        ));
    }

    #[test]
    fn wrong_key_or_nonce_fails() {
        let cipher = TokenCipher::new("s3cret").unwrap();
        let other = TokenCipher::new("another").unwrap();
        let (ciphertext, nonce) = cipher.encrypt(b"5ighna").unwrap();

        assert!(other.decrypt(&ciphertext, &nonce).is_err());
        assert!(cipher.decrypt(&ciphertext, &[0u8; NONCE_LEN]).is_err());
        assert!(matches!(
            cipher.decrypt(&ciphertext, &nonce[..4]),
            Err(IdentityError::InvalidNonce { actual: 4, .. })
        ));
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(
            TokenCipher::new(""),
            Err(IdentityError::MissingSecret)
        ));
    }
}
