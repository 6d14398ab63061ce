//! Key material that wipes itself

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// A 128-bit key (2-key 3DES or AES-128)
///
/// The bytes are zeroed when the value is dropped and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key128([u8; 16]);

impl Key128 {
    /// Key length in bytes
    pub const LEN: usize = 16;

    /// Wrap raw key bytes
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Copy a key from a slice of exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("key must be 16 bytes"))?;
        Ok(Self(bytes))
    }

    /// Borrow the key bytes
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Bytewise XOR of two keys
    pub fn xor(&self, other: &Self) -> Self {
        let mut out = [0u8; 16];
        for ((o, a), b) in out.iter_mut().zip(self.0.iter()).zip(other.0.iter()) {
            *o = a ^ b;
        }
        Self(out)
    }
}

impl From<[u8; 16]> for Key128 {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Key128 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for Key128 {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Key128 {}

impl fmt::Debug for Key128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key128(..)")
    }
}
