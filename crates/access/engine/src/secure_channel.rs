//! Secure messaging
//!
//! Once mutual authentication succeeds, every command and response travels inside an
//! envelope: the payload is padded and CBC-encrypted under the session encryption key, the
//! expected length is carried in its own data object, and a MAC over the send sequence
//! counter, the header and those objects is appended. Both peers advance the counter once
//! per message, so a captured envelope never verifies twice.

use bytes::Bytes;
use nexum_apdu_core::{Command, Response};
use tracing::{trace, warn};

use crate::{
    Error, Result,
    crypto::{
        CipherSuite, Key128, MAC_LEN, MacAlgorithm, compute_mac, decrypt_zero_iv,
        encrypt_zero_iv, iso_pad, iso_unpad, mac_matches,
    },
    tlv,
};

/// Class bits announcing a protected command with an authenticated header
pub const SM_CLASS_BITS: u8 = 0x0C;

const TAG_ENCRYPTED_ISO: u8 = 0x87;
const TAG_ENCRYPTED_BADGE: u8 = 0x85;
const TAG_EXPECTED_LENGTH: u8 = 0x97;
const TAG_STATUS: u8 = 0x99;
const TAG_MAC: u8 = 0x8E;
const PADDING_INDICATOR: u8 = 0x01;

/// The send sequence counter mixed into every MAC
///
/// The counter is a 64-bit big-endian value. AES channels fill their 16-byte counter block
/// with a fixed 8-byte prefix in front of the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSequenceCounter {
    prefix: Option<[u8; 8]>,
    value: u64,
}

impl SendSequenceCounter {
    /// Counter starting at `value`
    pub const fn new(value: u64) -> Self {
        Self {
            prefix: None,
            value,
        }
    }

    /// Counter starting at `value` behind a fixed prefix
    pub const fn with_prefix(prefix: [u8; 8], value: u64) -> Self {
        Self {
            prefix: Some(prefix),
            value,
        }
    }

    /// Counter from its 8-byte starting block
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self::new(u64::from_be_bytes(bytes))
    }

    /// Current counter value
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Advance by one, refusing to wrap around
    pub fn increment(&mut self) -> Result<u64> {
        self.value = self.value.checked_add(1).ok_or(Error::CounterExhausted)?;
        Ok(self.value)
    }

    /// Counter block as it enters the MAC, left-filled to `block_size`
    pub fn to_block(&self, block_size: usize) -> Vec<u8> {
        let mut block = Vec::with_capacity(block_size);
        if let Some(prefix) = self.prefix {
            block.extend_from_slice(&prefix);
        }
        block.extend_from_slice(&self.value.to_be_bytes());
        if block.len() < block_size {
            let mut filled = vec![0u8; block_size - block.len()];
            filled.extend_from_slice(&block);
            block = filled;
        }
        block
    }
}

/// Data-object layout of the encrypted payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeFormat {
    /// Tag `0x87` with a leading padding-indicator byte
    Iso7816,
    /// Tag `0x85`, ciphertext only
    Badge,
}

impl EnvelopeFormat {
    const fn tag(self) -> u8 {
        match self {
            Self::Iso7816 => TAG_ENCRYPTED_ISO,
            Self::Badge => TAG_ENCRYPTED_BADGE,
        }
    }

    fn encode(self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Iso7816 => {
                let mut value = Vec::with_capacity(1 + ciphertext.len());
                value.push(PADDING_INDICATOR);
                value.extend_from_slice(ciphertext);
                tlv::primitive(TAG_ENCRYPTED_ISO, &value)
            }
            Self::Badge => tlv::primitive(TAG_ENCRYPTED_BADGE, ciphertext),
        }
    }

    fn ciphertext(self, value: &[u8]) -> Result<&[u8]> {
        match self {
            Self::Iso7816 => match value.split_first() {
                Some((&PADDING_INDICATOR, ciphertext)) => Ok(ciphertext),
                _ => Err(Error::Protocol("unsupported padding indicator")),
            },
            Self::Badge => Ok(value),
        }
    }
}

/// An established secure messaging session
///
/// Keys are wiped when the channel is dropped.
#[derive(Debug)]
pub struct SecureChannel {
    suite: CipherSuite,
    mac_algorithm: MacAlgorithm,
    format: EnvelopeFormat,
    enc_key: Key128,
    mac_key: Key128,
    counter: SendSequenceCounter,
}

/// The data objects of a protected message
struct Envelope<'o, 'a> {
    encrypted: Option<&'o tlv::DataObject<'a>>,
    expected_length: Option<&'o tlv::DataObject<'a>>,
    status: Option<&'o tlv::DataObject<'a>>,
    mac: &'o [u8],
}

impl SecureChannel {
    /// Create a channel from session keys and the agreed counter start
    pub const fn new(
        suite: CipherSuite,
        mac_algorithm: MacAlgorithm,
        format: EnvelopeFormat,
        enc_key: Key128,
        mac_key: Key128,
        counter: SendSequenceCounter,
    ) -> Self {
        Self {
            suite,
            mac_algorithm,
            format,
            enc_key,
            mac_key,
            counter,
        }
    }

    /// Travel-document channel: 2-key 3DES, retail MAC, tag `0x87`
    pub const fn bac(enc_key: Key128, mac_key: Key128, counter: SendSequenceCounter) -> Self {
        Self::new(
            CipherSuite::TwoKeyTripleDes,
            MacAlgorithm::RetailMac,
            EnvelopeFormat::Iso7816,
            enc_key,
            mac_key,
            counter,
        )
    }

    /// Badge channel: CMAC over the negotiated cipher, tag `0x85`
    pub const fn badge(
        suite: CipherSuite,
        enc_key: Key128,
        mac_key: Key128,
        counter: SendSequenceCounter,
    ) -> Self {
        Self::new(
            suite,
            MacAlgorithm::Cmac,
            EnvelopeFormat::Badge,
            enc_key,
            mac_key,
            counter,
        )
    }

    /// The negotiated cipher
    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// The current counter state
    pub const fn counter(&self) -> &SendSequenceCounter {
        &self.counter
    }

    /// Protect a command on the reader side
    pub fn wrap_command(&mut self, command: &Command) -> Result<Command> {
        self.counter.increment()?;
        let block_size = self.suite.block_size();

        let header = command.header().with_class(command.cla | SM_CLASS_BITS);

        let encrypted = match command.data() {
            Some(data) if !data.is_empty() => Some(self.encrypt_payload(data)?),
            _ => None,
        };
        let expected_length = command
            .le
            .map(|le| tlv::primitive(TAG_EXPECTED_LENGTH, &[le]))
            .transpose()?;

        let mut mac_input = self.counter.to_block(block_size);
        mac_input.extend_from_slice(&iso_pad(&header.to_bytes(), block_size));
        mac_input.extend_from_slice(encrypted.as_deref().unwrap_or_default());
        mac_input.extend_from_slice(expected_length.as_deref().unwrap_or_default());
        let mac = self.mac(&mac_input)?;

        let mut body = Vec::new();
        body.extend_from_slice(encrypted.as_deref().unwrap_or_default());
        body.extend_from_slice(expected_length.as_deref().unwrap_or_default());
        body.extend_from_slice(&tlv::primitive(TAG_MAC, &mac)?);

        trace!(
            header = %header,
            counter = self.counter.value(),
            "Wrapped command"
        );

        Ok(Command::from_header(header).with_data(body).with_le(0x00))
    }

    /// Verify and decrypt a protected response on the reader side
    pub fn unwrap_response(&mut self, response: &Response) -> Result<Response> {
        self.counter.increment()?;

        if response.payload().is_empty() {
            // An unprotected status word means the peer rejected the envelope itself.
            return Err(if response.is_success() {
                Error::Protocol("secure messaging objects missing")
            } else {
                Error::Status(response.status())
            });
        }

        let objects = tlv::parse_objects(response.payload())?;
        let envelope = self.envelope(&objects)?;
        let status_object = envelope
            .status
            .ok_or(Error::Protocol("processing status object missing"))?;

        let mut mac_input = self.counter.to_block(self.suite.block_size());
        if let Some(encrypted) = envelope.encrypted {
            mac_input.extend_from_slice(encrypted.raw);
        }
        mac_input.extend_from_slice(status_object.raw);
        self.verify_mac(&mac_input, envelope.mac)?;

        let status: [u8; 2] = status_object
            .primitive()?
            .try_into()
            .map_err(|_| Error::Protocol("status object must be 2 bytes"))?;
        let payload = match envelope.encrypted {
            Some(encrypted) => self.decrypt_payload(encrypted.primitive()?)?,
            None => Vec::new(),
        };

        trace!(counter = self.counter.value(), "Unwrapped response");
        Ok(Response::new(payload, (status[0], status[1])))
    }

    /// Verify and decrypt a protected command on the credential side
    pub fn unwrap_command(&mut self, command: &Command) -> Result<Command> {
        self.counter.increment()?;

        if command.cla & SM_CLASS_BITS != SM_CLASS_BITS {
            return Err(Error::Protocol("command is not protected"));
        }
        let data = command
            .data()
            .ok_or(Error::Protocol("secure messaging objects missing"))?;
        let objects = tlv::parse_objects(data)?;
        let envelope = self.envelope(&objects)?;

        let block_size = self.suite.block_size();
        let mut mac_input = self.counter.to_block(block_size);
        mac_input.extend_from_slice(&iso_pad(&command.header().to_bytes(), block_size));
        if let Some(encrypted) = envelope.encrypted {
            mac_input.extend_from_slice(encrypted.raw);
        }
        if let Some(expected_length) = envelope.expected_length {
            mac_input.extend_from_slice(expected_length.raw);
        }
        self.verify_mac(&mac_input, envelope.mac)?;

        let header = command.header().with_class(command.cla & !SM_CLASS_BITS);
        let mut clear = Command::from_header(header);
        if let Some(encrypted) = envelope.encrypted {
            clear = clear.with_data(self.decrypt_payload(encrypted.primitive()?)?);
        }
        if let Some(expected_length) = envelope.expected_length {
            match expected_length.primitive()? {
                [le] => clear = clear.with_le(*le),
                _ => return Err(Error::Protocol("expected length object must be 1 byte")),
            }
        }

        trace!(header = %header, counter = self.counter.value(), "Unwrapped command");
        Ok(clear)
    }

    /// Protect a response on the credential side
    pub fn wrap_response(&mut self, response: &Response) -> Result<Response> {
        self.counter.increment()?;

        let encrypted = if response.payload().is_empty() {
            None
        } else {
            Some(self.encrypt_payload(response.payload())?)
        };
        let status = tlv::primitive(TAG_STATUS, &response.status().to_bytes())?;

        let mut mac_input = self.counter.to_block(self.suite.block_size());
        mac_input.extend_from_slice(encrypted.as_deref().unwrap_or_default());
        mac_input.extend_from_slice(&status);
        let mac = self.mac(&mac_input)?;

        let mut body = Vec::new();
        body.extend_from_slice(encrypted.as_deref().unwrap_or_default());
        body.extend_from_slice(&status);
        body.extend_from_slice(&tlv::primitive(TAG_MAC, &mac)?);

        trace!(counter = self.counter.value(), "Wrapped response");
        Ok(Response::new(Bytes::from(body), response.status()))
    }

    // Unknown objects are logged and skipped; they are never covered by the MAC or surfaced.
    fn envelope<'o, 'a>(&self, objects: &'o [tlv::DataObject<'a>]) -> Result<Envelope<'o, 'a>> {
        let known = [self.format.tag(), TAG_EXPECTED_LENGTH, TAG_STATUS, TAG_MAC];
        for object in objects {
            if !known.iter().any(|tag| object.has_tag(*tag)) {
                warn!(object = %hex::encode(object.raw), "Skipping unknown secure messaging object");
            }
        }

        let mac = tlv::find(objects, TAG_MAC)
            .map(|object| object.primitive())
            .transpose()?;
        match mac {
            Some(mac) if mac.len() == MAC_LEN => Ok(Envelope {
                encrypted: tlv::find(objects, self.format.tag()),
                expected_length: tlv::find(objects, TAG_EXPECTED_LENGTH),
                status: tlv::find(objects, TAG_STATUS),
                mac,
            }),
            _ => Err(Error::Protocol("MAC object missing or malformed")),
        }
    }

    fn encrypt_payload(&self, data: &[u8]) -> Result<Vec<u8>> {
        let padded = iso_pad(data, self.suite.block_size());
        let ciphertext = encrypt_zero_iv(self.suite, &self.enc_key, &padded)?;
        self.format.encode(&ciphertext)
    }

    fn decrypt_payload(&self, value: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = self.format.ciphertext(value)?;
        let padded = decrypt_zero_iv(self.suite, &self.enc_key, ciphertext)?;
        Ok(iso_unpad(&padded)?.to_vec())
    }

    fn mac(&self, input: &[u8]) -> Result<[u8; MAC_LEN]> {
        compute_mac(
            self.mac_algorithm,
            self.suite,
            &self.mac_key,
            &iso_pad(input, self.suite.block_size()),
        )
    }

    fn verify_mac(&self, input: &[u8], received: &[u8]) -> Result<()> {
        let computed = self.mac(input)?;
        if !mac_matches(&computed, received) {
            warn!(counter = self.counter.value(), "Secure messaging MAC mismatch");
            return Err(Error::Integrity("secure messaging MAC"));
        }
        Ok(())
    }
}
