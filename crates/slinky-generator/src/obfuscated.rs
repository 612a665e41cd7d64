use slinky_core::ShortCode;
use slinky_idgen::TinyId;
use typed_builder::TypedBuilder;

const LOWER_40_BITS_MASK: u64 = (1_u64 << 40) - 1;

/// Scrambles tinyflake ids so consecutive ids do not yield guessable codes.
///
/// Multiplication by an odd factor followed by an XOR is a bijection on the
/// 40-bit space, so distinct ids always map to distinct codes.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Obfuscator {
    /// Must be odd.
    #[builder(default = 3)]
    prime: u64,
    #[builder(default = 0xDEAD_BEEF_CAFE_BABE)]
    mask: u64,
}

impl Default for Obfuscator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Obfuscator {
    pub fn prime(&self) -> u64 {
        self.prime
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn obfuscate(&self, id: TinyId) -> [u8; 5] {
        let source = id.as_i64() as u64;
        let obfuscated = (source.wrapping_mul(self.prime) ^ self.mask) & LOWER_40_BITS_MASK;
        let bytes = obfuscated.to_be_bytes();
        [bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
    }

    /// The base58 code for `id`.
    pub fn code_for(&self, id: TinyId) -> ShortCode {
        ShortCode::from_base58_bytes(self.obfuscate(id))
    }
}
