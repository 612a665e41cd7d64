use sha2::{Digest, Sha256};
use slinky_core::{HashError, ShortCode, UrlHasher};
use typed_builder::TypedBuilder;

const MIN_CODE_BYTES: usize = 3;
const MAX_CODE_BYTES: usize = 16;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DigestHasherConfig {
    /// Digest bytes kept before base58 encoding.
    ///
    /// 6 bytes yield 8 or 9 characters.
    #[builder(default = 6)]
    pub code_bytes: usize,
    /// Mixed into every digest so separate deployments produce different codes.
    #[builder(default, setter(into))]
    pub salt: String,
}

impl Default for DigestHasherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Derives a code from the SHA-256 digest of the URL.
///
/// The same URL always yields the same code, so two requests for one URL
/// collide on purpose and the second falls back to the pool.
#[derive(Debug, Clone)]
pub struct DigestHasher {
    code_bytes: usize,
    salt: String,
}

impl DigestHasher {
    pub fn new(config: DigestHasherConfig) -> Result<Self, HashError> {
        if !(MIN_CODE_BYTES..=MAX_CODE_BYTES).contains(&config.code_bytes) {
            return Err(HashError(format!(
                "code bytes must be between {MIN_CODE_BYTES} and {MAX_CODE_BYTES}, got {}",
                config.code_bytes
            )));
        }

        Ok(Self {
            code_bytes: config.code_bytes,
            salt: config.salt,
        })
    }
}

impl Default for DigestHasher {
    fn default() -> Self {
        Self {
            code_bytes: 6,
            salt: String::new(),
        }
    }
}

impl UrlHasher for DigestHasher {
    fn shorten(&self, url: &str) -> Result<ShortCode, HashError> {
        if url.is_empty() {
            return Err(HashError("cannot shorten an empty URL".to_string()));
        }

        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();

        Ok(ShortCode::from_base58_bytes(&digest[..self.code_bytes]))
    }
}
