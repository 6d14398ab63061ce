//! Key derivation strategies
//!
//! All strategies turn long-term secret material into purpose-specific 128-bit keys behind
//! the one [`KeyDerivation`] interface:
//!
//! - [`HashKdf`]: hash the identifying fields into a seed, then hash the seed with a 4-byte
//!   purpose counter and force odd parity (the ICAO 9303 document KDF).
//! - [`CipherKdf`]: counter-mode derivation with CMAC as the PRF, keyed with the secret
//!   (badge static keys).
//! - [`IteratedHashKdf`]: repeated hashing of the exchanged session nonces (badge session
//!   keys).

use derive_more::Display;

use crate::{
    auth::Scheme,
    crypto::{CipherSuite, HashAlgorithm, Key128, adjust_parity, cmac_block},
    Result,
};

/// What a derived key will be used for
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyPurpose {
    /// Encryption (privacy) key
    #[display("encryption")]
    Encryption = 1,
    /// MAC (authentication) key
    #[display("mac")]
    Mac = 2,
}

impl KeyPurpose {
    /// Counter value mixed into the derivation
    pub const fn counter(self) -> u8 {
        self as u8
    }
}

/// Inputs shared by every derivation strategy
#[derive(Clone, Copy)]
pub struct DerivationInput<'a> {
    /// Long-term secret
    pub secret: &'a [u8],
    /// Object (application file) identifier
    pub object_id: &'a [u8],
    /// Per-credential diversifier
    pub diversifier: &'a [u8],
    /// Key slot on the credential
    pub key_index: u8,
}

impl std::fmt::Debug for DerivationInput<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivationInput")
            .field("object_id", &hex::encode(self.object_id))
            .field("diversifier", &hex::encode(self.diversifier))
            .field("key_index", &self.key_index)
            .finish_non_exhaustive()
    }
}

impl<'a> DerivationInput<'a> {
    /// Input made only of secret material (no identifiers)
    pub const fn from_secret(secret: &'a [u8]) -> Self {
        Self {
            secret,
            object_id: &[],
            diversifier: &[],
            key_index: 0,
        }
    }
}

/// A way of turning secret material into purpose-specific keys
pub trait KeyDerivation: std::fmt::Debug + Send + Sync {
    /// Derive the key for `purpose`
    fn derive(&self, input: &DerivationInput<'_>, purpose: KeyPurpose) -> Result<Key128>;

    /// Derive the encryption and MAC keys together
    fn derive_pair(&self, input: &DerivationInput<'_>) -> Result<(Key128, Key128)> {
        Ok((
            self.derive(input, KeyPurpose::Encryption)?,
            self.derive(input, KeyPurpose::Mac)?,
        ))
    }
}

/// Hash-based derivation with odd key parity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashKdf {
    hash: HashAlgorithm,
}

impl HashKdf {
    /// Create a hash-based derivation
    pub const fn new(hash: HashAlgorithm) -> Self {
        Self { hash }
    }

    /// SHA-1 derivation, as used for travel documents
    pub const fn sha1() -> Self {
        Self::new(HashAlgorithm::Sha1)
    }

    /// First 16 bytes of the hash over the identifying fields
    pub fn seed(&self, input: &DerivationInput<'_>) -> [u8; 16] {
        let digest = self
            .hash
            .digest(&[input.secret, input.object_id, input.diversifier]);
        let mut seed = [0u8; 16];
        seed.copy_from_slice(&digest[..16]);
        seed
    }

    /// Derive from an already computed seed
    pub fn derive_from_seed(&self, seed: &[u8], purpose: KeyPurpose) -> Result<Key128> {
        let counter = [0x00, 0x00, 0x00, purpose.counter()];
        let digest = self.hash.digest(&[seed, &counter]);
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        adjust_parity(&mut key);
        Ok(Key128::new(key))
    }
}

impl KeyDerivation for HashKdf {
    fn derive(&self, input: &DerivationInput<'_>, purpose: KeyPurpose) -> Result<Key128> {
        self.derive_from_seed(&self.seed(input), purpose)
    }
}

/// Counter-mode derivation with CMAC as the PRF
///
/// Block `i` is `CMAC(secret, i || purpose || key_index || 0x00 || object_id || diversifier
/// || 0x0080)`; blocks are concatenated until 16 bytes are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherKdf {
    suite: CipherSuite,
}

impl CipherKdf {
    /// Output length in bits, encoded into every block
    const OUTPUT_BITS: [u8; 2] = [0x00, 0x80];

    /// Create a cipher-based derivation
    pub const fn new(suite: CipherSuite) -> Self {
        Self { suite }
    }
}

impl KeyDerivation for CipherKdf {
    fn derive(&self, input: &DerivationInput<'_>, purpose: KeyPurpose) -> Result<Key128> {
        let secret = Key128::from_slice(input.secret)?;
        let block_size = self.suite.block_size();

        let mut message = Vec::with_capacity(
            4 + input.object_id.len() + input.diversifier.len() + Self::OUTPUT_BITS.len(),
        );
        message.extend_from_slice(&[0x00, purpose.counter(), input.key_index, 0x00]);
        message.extend_from_slice(input.object_id);
        message.extend_from_slice(input.diversifier);
        message.extend_from_slice(&Self::OUTPUT_BITS);

        let mut output = Vec::with_capacity(Key128::LEN + block_size);
        let mut counter = 1u8;
        while output.len() < Key128::LEN {
            message[0] = counter;
            output.extend_from_slice(&cmac_block(self.suite, &secret, &message)?);
            counter += 1;
        }

        Key128::from_slice(&output[..Key128::LEN])
    }
}

/// Session derivation by iterated hashing
///
/// The secret is the session context block; each round hashes a 4-byte big-endian round
/// number followed by the context, until 32 bytes are collected. The encryption key is the
/// first half and the MAC key the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratedHashKdf {
    hash: HashAlgorithm,
}

impl IteratedHashKdf {
    /// Create an iterated-hash derivation
    pub const fn new(hash: HashAlgorithm) -> Self {
        Self { hash }
    }

    /// Assemble the session context block
    pub fn context(
        reader_nonce: &[u8],
        card_nonce: &[u8],
        suite: CipherSuite,
        card_random: &[u8],
        uid: &[u8],
    ) -> Vec<u8> {
        let mut context = Vec::with_capacity(
            reader_nonce.len() + card_nonce.len() + 2 + card_random.len() + uid.len(),
        );
        context.extend_from_slice(reader_nonce);
        context.extend_from_slice(card_nonce);
        context.push(suite.selector());
        context.push(suite.selector());
        context.extend_from_slice(card_random);
        context.extend_from_slice(uid);
        context
    }
}

impl KeyDerivation for IteratedHashKdf {
    fn derive(&self, input: &DerivationInput<'_>, purpose: KeyPurpose) -> Result<Key128> {
        let mut accumulator = Vec::with_capacity(2 * Key128::LEN + self.hash.output_len());
        let mut round = 1u32;
        while accumulator.len() < 2 * Key128::LEN {
            accumulator.extend_from_slice(&self.hash.digest(&[&round.to_be_bytes(), input.secret]));
            round += 1;
        }

        let offset = match purpose {
            KeyPurpose::Encryption => 0,
            KeyPurpose::Mac => Key128::LEN,
        };
        Key128::from_slice(&accumulator[offset..offset + Key128::LEN])
    }
}

/// The derivation strategies, selected by scheme and negotiated algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfStrategy {
    /// Hash-based static keys
    Hash(HashKdf),
    /// Cipher-based static keys
    Cipher(CipherKdf),
    /// Iterated-hash session keys
    IteratedHash(IteratedHashKdf),
}

impl KdfStrategy {
    /// Strategy for the long-term keys of `scheme`
    pub const fn for_static_keys(scheme: Scheme, suite: CipherSuite) -> Self {
        match scheme {
            Scheme::Bac => Self::Hash(HashKdf::sha1()),
            Scheme::Badge => Self::Cipher(CipherKdf::new(suite)),
        }
    }

    /// Strategy for the session keys of `scheme`
    pub const fn for_session_keys(scheme: Scheme, hash: HashAlgorithm) -> Self {
        match scheme {
            Scheme::Bac => Self::Hash(HashKdf::sha1()),
            Scheme::Badge => Self::IteratedHash(IteratedHashKdf::new(hash)),
        }
    }
}

impl KeyDerivation for KdfStrategy {
    fn derive(&self, input: &DerivationInput<'_>, purpose: KeyPurpose) -> Result<Key128> {
        match self {
            Self::Hash(kdf) => kdf.derive(input, purpose),
            Self::Cipher(kdf) => kdf.derive(input, purpose),
            Self::IteratedHash(kdf) => kdf.derive(input, purpose),
        }
    }
}
