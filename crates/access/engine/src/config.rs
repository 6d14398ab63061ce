//! Serializable credential records and engine settings
//!
//! Every field has a default, so a partial TOML file (or none at all) yields a working
//! configuration. Byte fields are hex strings.

use std::time::Duration;

use nexum_apdu_transport_link::{LinkConfig, OverflowPolicy};
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    auth::{
        Scheme,
        bac::{BacCredential, BacReader, MrzInfo},
        badge::{
            BadgeCredential, BadgeKeyset, BadgeReader, DEFAULT_KEY_NO, DEFAULT_OBJECT_ID,
            DEFAULT_READER_UID,
        },
    },
    crypto::{CipherSuite, HashAlgorithm, Key128},
};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Scheme used when none is requested explicitly
    pub scheme: Scheme,
    /// Link transport settings
    pub link: LinkSettings,
    /// Travel-document credential
    pub bac: BacCredentialConfig,
    /// Access badge credential
    pub badge: BadgeCredentialConfig,
}

/// Queue overflow behaviour as written in configuration files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Drop the packet
    #[default]
    Drop,
    /// Block the producer
    Block,
}

/// Serializable form of [`LinkConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Packet size, flag byte included
    pub mtu: usize,
    /// Inbound queue depth
    pub queue_capacity: usize,
    /// Full-queue behaviour
    pub overflow: Overflow,
    /// Reply timeout in milliseconds
    pub reply_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let defaults = LinkConfig::default();
        Self {
            mtu: defaults.mtu,
            queue_capacity: defaults.queue_capacity,
            overflow: Overflow::Drop,
            reply_timeout_ms: u64::try_from(defaults.reply_timeout.as_millis()).unwrap_or(2_000),
        }
    }
}

impl LinkSettings {
    /// Build the transport configuration
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::new()
            .with_mtu(self.mtu)
            .with_queue_capacity(self.queue_capacity)
            .with_overflow(match self.overflow {
                Overflow::Drop => OverflowPolicy::Drop,
                Overflow::Block => OverflowPolicy::Block,
            })
            .with_reply_timeout(Duration::from_millis(self.reply_timeout_ms))
    }
}

/// A travel document: the MRZ fields and the content of EF.DG1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacCredentialConfig {
    /// Document number, up to 9 characters
    pub document_number: String,
    /// Date of birth, `YYMMDD`
    pub date_of_birth: String,
    /// Date of expiry, `YYMMDD`
    pub date_of_expiry: String,
    /// EF.DG1 content served by the credential
    #[serde(with = "hex::serde")]
    pub dg1: Vec<u8>,
}

impl Default for BacCredentialConfig {
    // ICAO 9303 specimen document
    fn default() -> Self {
        Self {
            document_number: "L898902C".into(),
            date_of_birth: "690806".into(),
            date_of_expiry: "940623".into(),
            dg1: b"P<UTOERIKSSON<<ANNA<MARIA".to_vec(),
        }
    }
}

impl BacCredentialConfig {
    /// Validated MRZ fields
    pub fn mrz(&self) -> Result<MrzInfo> {
        MrzInfo::new(&self.document_number, &self.date_of_birth, &self.date_of_expiry)
    }

    /// Reader holding the document keys
    pub fn reader(&self) -> Result<BacReader> {
        BacReader::from_mrz(&self.mrz()?)
    }

    /// Credential answering with the document keys
    pub fn credential(&self) -> Result<BacCredential> {
        BacCredential::from_mrz(&self.mrz()?, self.dg1.clone())
    }
}

/// An access badge: the static keyset, the ADF it lives in and the object it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeCredentialConfig {
    /// ADF read (master) key
    #[serde(with = "hex::serde")]
    pub read_key: [u8; 16],
    /// ADF privacy encryption key
    #[serde(with = "hex::serde")]
    pub privacy_enc: [u8; 16],
    /// ADF privacy MAC key
    #[serde(with = "hex::serde")]
    pub privacy_mac: [u8; 16],
    /// Object identifier of the ADF
    #[serde(with = "hex::serde")]
    pub object_id: Vec<u8>,
    /// Credential diversifier
    #[serde(with = "hex::serde")]
    pub diversifier: Vec<u8>,
    /// Cipher offered by the credential
    pub cipher: CipherSuite,
    /// Hash offered by the credential
    pub hash: HashAlgorithm,
    /// Key slot the reader authenticates against
    pub key_no: u8,
    /// Reader identifier
    #[serde(with = "hex::serde")]
    pub uid: [u8; 8],
    /// Secure identity object served by the credential
    #[serde(with = "hex::serde")]
    pub sio: Vec<u8>,
}

impl Default for BadgeCredentialConfig {
    // Demonstration keyset; real deployments load their own.
    fn default() -> Self {
        Self {
            read_key: [
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC,
                0xDD, 0xEE, 0xFF,
            ],
            privacy_enc: [
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
                0x0E, 0x0F, 0x10,
            ],
            privacy_mac: [
                0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D,
                0x1E, 0x1F, 0x20,
            ],
            object_id: DEFAULT_OBJECT_ID.to_vec(),
            diversifier: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
            cipher: CipherSuite::Aes128,
            hash: HashAlgorithm::Sha1,
            key_no: DEFAULT_KEY_NO,
            uid: DEFAULT_READER_UID,
            sio: vec![
                0x30, 0x0A, 0x81, 0x08, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11,
            ],
        }
    }
}

impl BadgeCredentialConfig {
    /// The static keyset
    pub fn keyset(&self) -> BadgeKeyset {
        BadgeKeyset {
            read_key: Key128::new(self.read_key),
            privacy_enc: Key128::new(self.privacy_enc),
            privacy_mac: Key128::new(self.privacy_mac),
        }
    }

    /// Reader for this badge
    pub fn reader(&self) -> BadgeReader {
        BadgeReader::new(self.keyset(), self.object_id.clone())
            .with_key_no(self.key_no)
            .with_uid(self.uid)
    }

    /// Credential serving this badge
    pub fn credential(&self) -> BadgeCredential {
        BadgeCredential::new(
            self.keyset(),
            self.object_id.clone(),
            self.diversifier.clone(),
            self.sio.clone(),
        )
        .with_algorithms(self.cipher, self.hash)
    }
}
