use crate::error::GenerateError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Display;

/// A short code identifying a shortened URL.
///
/// Codes handed out by the pipeline are base58 strings produced by a hasher or
/// the pre-generation pool; caller-supplied custom codes go through
/// [`ShortCode::new`], which enforces 3-32 characters of `[a-zA-Z0-9_-]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortCode(String);

const MIN_LENGTH: usize = 3;
const MAX_LENGTH: usize = 32;

impl ShortCode {
    /// Creates a new `ShortCode` after validating the input.
    pub fn new(code: impl Into<String>) -> Result<Self, GenerateError> {
        let code = code.into();
        Self::validate(&code)?;
        Ok(Self(code))
    }

    /// Creates a `ShortCode` without validation.
    ///
    /// Use this only for codes produced by trusted internal sources
    /// (hashers, the pre-generation pool, rows read back from storage).
    pub fn new_unchecked(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Encodes raw bytes as a base58 short code.
    pub fn from_base58_bytes<T: AsRef<[u8]>>(bytes: T) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    /// Generates the full shortened URL based on the provided base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A stable, non-negative 64-bit key derived from the code.
    ///
    /// Every write and lookup of one code routes through this value, so all of
    /// them hit the same table and its unique constraint.
    pub fn shard_key(&self) -> i64 {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut head = [0_u8; 8];
        head.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(head) & i64::MAX
    }

    fn validate(code: &str) -> Result<(), GenerateError> {
        if code.len() < MIN_LENGTH || code.len() > MAX_LENGTH {
            return Err(GenerateError::InvalidRequest(format!(
                "short code length must be between {} and {}, got {}",
                MIN_LENGTH,
                MAX_LENGTH,
                code.len()
            )));
        }

        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(GenerateError::InvalidRequest(format!(
                "short code must contain only alphanumeric characters, hyphens, or underscores: '{}'",
                code
            )));
        }

        Ok(())
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShortCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
