use thiserror::Error;

/// Result type for code encoding and decoding.
pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("id {id} is outside the code space (0..={max})")]
    OutOfRange { id: i64, max: i64 },
    #[error("malformed code '{code}': {reason}")]
    Malformed { code: String, reason: &'static str },
    #[error("code '{0}' is below the code space offset")]
    BelowOffset(String),
}

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RADIX: u64 = 36;

/// A fixed-width base-36 code space.
///
/// Codes are `base36(offset + id)`. The offset is picked so that every id
/// in range renders with exactly `width` characters, which also keeps two
/// spaces with different widths from ever producing each other's codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeSpace {
    offset: u64,
    width: usize,
}

/// Code space for short URL codes (8 characters).
pub const URL_CODES: CodeSpace = CodeSpace::new(99_999_999_999, 8);

/// Code space for user hashes (6 characters).
pub const USER_CODES: CodeSpace = CodeSpace::new(333_333_333, 6);

impl CodeSpace {
    /// Creates a code space. `offset` must render with exactly `width` digits.
    pub const fn new(offset: u64, width: usize) -> Self {
        Self { offset, width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// The largest id that still encodes within `width` characters.
    pub fn max_id(&self) -> i64 {
        let limit = RADIX.pow(self.width as u32) - 1;
        (limit - self.offset) as i64
    }

    pub fn encode(&self, id: i64) -> Result<String> {
        let max = self.max_id();
        if id < 0 || id > max {
            return Err(CodecError::OutOfRange { id, max });
        }

        let mut value = self.offset + id as u64;
        let mut buf = vec![b'0'; self.width];
        for slot in buf.iter_mut().rev() {
            *slot = ALPHABET[(value % RADIX) as usize];
            value /= RADIX;
        }

        Ok(buf.into_iter().map(char::from).collect())
    }

    pub fn decode(&self, code: &str) -> Result<i64> {
        if code.len() != self.width {
            return Err(CodecError::Malformed {
                code: code.to_string(),
                reason: "unexpected length",
            });
        }

        let mut value: u64 = 0;
        for byte in code.bytes() {
            let digit = match byte {
                b'0'..=b'9' => byte - b'0',
                b'a'..=b'z' => byte - b'a' + 10,
                _ => {
                    return Err(CodecError::Malformed {
                        code: code.to_string(),
                        reason: "characters must be in [0-9a-z]",
                    })
                }
            };
            value = value
                .checked_mul(RADIX)
                .and_then(|v| v.checked_add(u64::from(digit)))
                .ok_or_else(|| CodecError::Malformed {
                    code: code.to_string(),
                    reason: "numeric overflow",
                })?;
        }

        let id = value
            .checked_sub(self.offset)
            .ok_or_else(|| CodecError::BelowOffset(code.to_string()))?;
        i64::try_from(id).map_err(|_| CodecError::Malformed {
            code: code.to_string(),
            reason: "numeric overflow",
        })
    }
}

pub fn encode_url_code(id: i64) -> Result<String> {
    URL_CODES.encode(id)
}

pub fn decode_url_code(code: &str) -> Result<i64> {
    URL_CODES.decode(code)
}

pub fn encode_user_code(id: i64) -> Result<String> {
    USER_CODES.encode(id)
}

pub fn decode_user_code(code: &str) -> Result<i64> {
    USER_CODES.decode(code)
}
