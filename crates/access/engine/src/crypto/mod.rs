//! Cryptographic primitives for authentication and secure messaging
//!
//! Block ciphers run in CBC mode with a caller-supplied IV (all-zero everywhere except the
//! badge selection payload). MACs are either ISO/IEC 9797-1 Algorithm 3 ("retail MAC") over
//! single DES or CMAC over the suite's block cipher, both truncated to 8 bytes. Padding is
//! ISO/IEC 7816-4 method 2: `0x80` followed by zeros up to the block boundary.

mod key;

use aes::Aes128;
use cbc_mac::CbcMac;
use cipher::{
    BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit,
    KeyIvInit, block_padding::NoPadding,
};
use cmac::{Cmac, Mac};
use des::{Des, TdesEde2};
use derive_more::Display;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub use key::Key128;

use crate::{Error, Result};

/// Length of every truncated MAC on the wire
pub const MAC_LEN: usize = 8;

/// A truncated MAC
pub type Mac8 = [u8; MAC_LEN];

/// Block cipher negotiated for a session
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CipherSuite {
    /// Two-key triple DES (EDE), CBC mode
    #[display("2-key 3DES")]
    #[serde(rename = "3des")]
    TwoKeyTripleDes = 0x02,
    /// AES-128, CBC mode
    #[display("AES-128")]
    #[serde(rename = "aes128")]
    Aes128 = 0x09,
}

impl CipherSuite {
    /// Cipher block size in bytes
    pub const fn block_size(self) -> usize {
        match self {
            Self::TwoKeyTripleDes => 8,
            Self::Aes128 => 16,
        }
    }

    /// Selector byte used on the wire
    pub const fn selector(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CipherSuite {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x02 => Ok(Self::TwoKeyTripleDes),
            0x09 => Ok(Self::Aes128),
            other => Err(Error::UnsupportedAlgorithm(other)),
        }
    }
}

/// Hash function negotiated for a session
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum HashAlgorithm {
    /// SHA-1
    #[display("SHA-1")]
    Sha1 = 0x06,
    /// SHA-256
    #[display("SHA-256")]
    Sha256 = 0x07,
}

impl HashAlgorithm {
    /// Selector byte used on the wire
    pub const fn selector(self) -> u8 {
        self as u8
    }

    /// Digest length in bytes
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Hash the concatenation of `parts`
    pub fn digest(self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha1 => {
                let mut hasher = Sha1::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
        }
    }
}

impl TryFrom<u8> for HashAlgorithm {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x06 => Ok(Self::Sha1),
            0x07 => Ok(Self::Sha256),
            other => Err(Error::UnsupportedAlgorithm(other)),
        }
    }
}

/// MAC construction protecting a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// ISO/IEC 9797-1 Algorithm 3 over single DES
    RetailMac,
    /// CMAC over the suite's block cipher
    Cmac,
}

/// Pad `data` with `0x80` and zeros to a multiple of `block_size`
///
/// A full block of padding is added when `data` is already aligned.
pub fn iso_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let padded_len = (data.len() / block_size + 1) * block_size;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(data);
    padded.push(0x80);
    padded.resize(padded_len, 0x00);
    padded
}

/// Strip ISO/IEC 7816-4 padding by scanning backward for the `0x80` marker
pub fn iso_unpad(data: &[u8]) -> Result<&[u8]> {
    let marker = data
        .iter()
        .rposition(|&b| b != 0x00)
        .ok_or(Error::Protocol("padding marker missing"))?;
    if data[marker] != 0x80 {
        return Err(Error::Protocol("padding marker missing"));
    }
    Ok(&data[..marker])
}

/// Encrypt block-aligned `data` in CBC mode
///
/// # Arguments
///
/// * `suite` - The block cipher
/// * `key` - The 16-byte key
/// * `iv` - One block of IV
/// * `data` - Block-aligned plaintext
pub fn encrypt_cbc(suite: CipherSuite, key: &Key128, iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = data.to_vec();
    match suite {
        CipherSuite::TwoKeyTripleDes => cbc_encrypt::<TdesEde2>(key, iv, &mut buffer)?,
        CipherSuite::Aes128 => cbc_encrypt::<Aes128>(key, iv, &mut buffer)?,
    }
    Ok(buffer)
}

/// Decrypt block-aligned `data` in CBC mode; padding is left in place
pub fn decrypt_cbc(suite: CipherSuite, key: &Key128, iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = data.to_vec();
    match suite {
        CipherSuite::TwoKeyTripleDes => cbc_decrypt::<TdesEde2>(key, iv, &mut buffer)?,
        CipherSuite::Aes128 => cbc_decrypt::<Aes128>(key, iv, &mut buffer)?,
    }
    Ok(buffer)
}

/// CBC encryption with the all-zero IV
pub fn encrypt_zero_iv(suite: CipherSuite, key: &Key128, data: &[u8]) -> Result<Vec<u8>> {
    encrypt_cbc(suite, key, &[0u8; 16][..suite.block_size()], data)
}

/// CBC decryption with the all-zero IV
pub fn decrypt_zero_iv(suite: CipherSuite, key: &Key128, data: &[u8]) -> Result<Vec<u8>> {
    decrypt_cbc(suite, key, &[0u8; 16][..suite.block_size()], data)
}

fn cbc_encrypt<C>(key: &Key128, iv: &[u8], buffer: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let len = buffer.len();
    cbc::Encryptor::<C>::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| Error::Crypto("invalid key or IV length"))?
        .encrypt_padded_mut::<NoPadding>(buffer, len)
        .map_err(|_| Error::Crypto("data is not block aligned"))?;
    Ok(())
}

fn cbc_decrypt<C>(key: &Key128, iv: &[u8], buffer: &mut [u8]) -> Result<()>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| Error::Crypto("invalid key or IV length"))?
        .decrypt_padded_mut::<NoPadding>(buffer)
        .map_err(|_| Error::Crypto("data is not block aligned"))?;
    Ok(())
}

/// ISO/IEC 9797-1 MAC Algorithm 3 over pre-padded data
///
/// CBC-chain single DES with the first key half, then decrypt the last block with the
/// second half and encrypt it again with the first.
pub fn retail_mac(key: &Key128, padded: &[u8]) -> Result<Mac8> {
    if padded.is_empty() || padded.len() % 8 != 0 {
        return Err(Error::Crypto("MAC input is not block aligned"));
    }

    let (k1, k2) = key.as_bytes().split_at(8);
    let mut chain = <CbcMac<Des> as Mac>::new_from_slice(k1)
        .map_err(|_| Error::Crypto("invalid DES key length"))?;
    chain.update(padded);
    let mut block = chain.finalize().into_bytes();

    Des::new_from_slice(k2)
        .map_err(|_| Error::Crypto("invalid DES key length"))?
        .decrypt_block(&mut block);
    Des::new_from_slice(k1)
        .map_err(|_| Error::Crypto("invalid DES key length"))?
        .encrypt_block(&mut block);

    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&block);
    Ok(mac)
}

/// CMAC over `data`, truncated to 8 bytes
pub fn cmac(suite: CipherSuite, key: &Key128, data: &[u8]) -> Result<Mac8> {
    let tag = match suite {
        CipherSuite::TwoKeyTripleDes => {
            let mut mac = <Cmac<TdesEde2> as Mac>::new_from_slice(key.as_bytes())
                .map_err(|_| Error::Crypto("invalid 3DES key length"))?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        CipherSuite::Aes128 => {
            let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key.as_bytes())
                .map_err(|_| Error::Crypto("invalid AES key length"))?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    };

    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&tag[..MAC_LEN]);
    Ok(mac)
}

/// Full CMAC output (one cipher block), used to build synthetic IVs
pub fn cmac_block(suite: CipherSuite, key: &Key128, data: &[u8]) -> Result<Vec<u8>> {
    match suite {
        CipherSuite::TwoKeyTripleDes => {
            let mut mac = <Cmac<TdesEde2> as Mac>::new_from_slice(key.as_bytes())
                .map_err(|_| Error::Crypto("invalid 3DES key length"))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        CipherSuite::Aes128 => {
            let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key.as_bytes())
                .map_err(|_| Error::Crypto("invalid AES key length"))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// Compute the channel MAC over pre-padded data
pub fn compute_mac(
    algorithm: MacAlgorithm,
    suite: CipherSuite,
    key: &Key128,
    padded: &[u8],
) -> Result<Mac8> {
    match algorithm {
        MacAlgorithm::RetailMac => retail_mac(key, padded),
        MacAlgorithm::Cmac => cmac(suite, key, padded),
    }
}

/// Compare two MACs in constant time
pub fn mac_matches(computed: &[u8], received: &[u8]) -> bool {
    computed.ct_eq(received).into()
}

/// Force odd parity on every byte (DES key convention)
pub fn adjust_parity(bytes: &mut [u8]) {
    for byte in bytes.iter_mut() {
        let high = *byte & 0xFE;
        *byte = if high.count_ones() % 2 == 0 {
            high | 0x01
        } else {
            high
        };
    }
}

/// Fresh random bytes for nonces and key halves
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_iso_pad() {
        assert_eq!(iso_pad(&hex!("011E"), 8), hex!("011E800000000000"));
        assert_eq!(iso_pad(&hex!("0102030405060708"), 8).len(), 16);
        assert_eq!(iso_pad(&[], 16), hex!("80000000000000000000000000000000"));
    }

    #[test]
    fn test_iso_unpad() {
        assert_eq!(iso_unpad(&hex!("011E800000000000")).unwrap(), &hex!("011E"));
        assert_eq!(iso_unpad(&hex!("60145F0180000000")).unwrap(), &hex!("60145F01"));
        assert!(iso_unpad(&hex!("0000000000000000")).is_err());
        assert!(iso_unpad(&hex!("011E000000000001")).is_err());
    }

    #[test]
    fn test_selectors() {
        assert_eq!(CipherSuite::try_from(0x02).unwrap(), CipherSuite::TwoKeyTripleDes);
        assert_eq!(CipherSuite::try_from(0x09).unwrap(), CipherSuite::Aes128);
        assert!(matches!(
            CipherSuite::try_from(0x03),
            Err(Error::UnsupportedAlgorithm(0x03))
        ));
        assert_eq!(HashAlgorithm::try_from(0x07).unwrap(), HashAlgorithm::Sha256);
        assert!(matches!(
            HashAlgorithm::try_from(0x05),
            Err(Error::UnsupportedAlgorithm(0x05))
        ));
    }

    #[test]
    fn test_tdes_cbc_known_answer() {
        // BAC EXTERNAL AUTHENTICATE cryptogram (ICAO 9303-11 worked example)
        let k_enc = Key128::new(hex!("AB94FDECF2674FDFB9B391F85D7F76F2"));
        let s = hex!(
            "781723860C06C2264608F919887022120B795240CB7049B01C19B33E32804F0B"
        );
        let e_ifd = encrypt_zero_iv(CipherSuite::TwoKeyTripleDes, &k_enc, &s).unwrap();
        assert_eq!(
            e_ifd,
            hex!("72C29C2371CC9BDB65B779B8E8D37B29ECC154AA56A8799FAE2F498F76ED92F2")
        );
        let clear = decrypt_zero_iv(CipherSuite::TwoKeyTripleDes, &k_enc, &e_ifd).unwrap();
        assert_eq!(clear, s);
    }

    #[test]
    fn test_retail_mac_known_answer() {
        let k_mac = Key128::new(hex!("7962D9ECE03D1ACD4C76089DCE131543"));
        let e_ifd = hex!("72C29C2371CC9BDB65B779B8E8D37B29ECC154AA56A8799FAE2F498F76ED92F2");
        let mac = retail_mac(&k_mac, &iso_pad(&e_ifd, 8)).unwrap();
        assert_eq!(mac, hex!("5F1448EEA8AD90A7"));
    }

    #[test]
    fn test_retail_mac_rejects_unaligned() {
        let key = Key128::new([0x11; 16]);
        assert!(retail_mac(&key, &hex!("0102")).is_err());
        assert!(retail_mac(&key, &[]).is_err());
    }

    #[test]
    fn test_aes_cmac_known_answer() {
        // RFC 4493, empty message
        let key = Key128::new(hex!("2B7E151628AED2A6ABF7158809CF4F3C"));
        assert_eq!(
            cmac_block(CipherSuite::Aes128, &key, &[]).unwrap(),
            hex!("BB1D6929E95937287FA37D129B756746")
        );
        assert_eq!(
            cmac(CipherSuite::Aes128, &key, &[]).unwrap(),
            hex!("BB1D6929E9593728")
        );
    }

    #[test]
    fn test_unaligned_cbc_input() {
        let key = Key128::new([0x22; 16]);
        assert!(encrypt_zero_iv(CipherSuite::Aes128, &key, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_adjust_parity() {
        let mut bytes = hex!("239AB9CB282DAF66");
        adjust_parity(&mut bytes);
        assert!(bytes.iter().all(|b| b.count_ones() % 2 == 1));
        assert_eq!(bytes, hex!("239BB9CB292CAE67"));
    }

    #[test]
    fn test_mac_matches() {
        assert!(mac_matches(&hex!("5F1448EEA8AD90A7"), &hex!("5F1448EEA8AD90A7")));
        assert!(!mac_matches(&hex!("5F1448EEA8AD90A7"), &hex!("5F1448EEA8AD90A6")));
        assert!(!mac_matches(&hex!("5F1448EEA8AD90A7"), &hex!("5F1448EE")));
    }
}
