//! Short-code producers.
//!
//! [`DigestHasher`] derives a code from the URL itself; [`Pregenerator`]
//! mints fresh codes in bulk and stores them in a [`CodePool`] for the
//! pipeline to fall back on.
//!
//! [`CodePool`]: slinky_core::CodePool

pub mod error;
mod hasher;
mod obfuscated;
mod pregen;

pub use error::Error;
pub use hasher::{DigestHasher, DigestHasherConfig};
pub use obfuscated::Obfuscator;
pub use pregen::{PregenConfig, Pregenerator};
