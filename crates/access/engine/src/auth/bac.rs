//! Basic Access Control (ICAO 9303-11)
//!
//! The document keys come from the machine readable zone: document number, date of birth
//! and date of expiry, each followed by its check digit, hashed into a key seed. The reader
//! then runs GET CHALLENGE / EXTERNAL AUTHENTICATE, both sides contribute a 16-byte key
//! half, and the session keys are derived from the XOR of the halves.

use bytes::Bytes;
use nexum_apdu_core::{Command, Response, StatusWord};
use tracing::{debug, trace};
use zeroize::Zeroize;

use super::{
    AuthParameters, AuthState, CredentialAuthenticator, ReaderAuthenticator, Scheme,
    fixed_or_random, open_cryptogram, seal_cryptogram, success_payload,
};
use crate::{
    Error, ProtocolContext, Result,
    crypto::{CipherSuite, HashAlgorithm, Key128, MacAlgorithm},
    kdf::{DerivationInput, HashKdf, KdfStrategy, KeyDerivation, KeyPurpose},
    secure_channel::{SecureChannel, SendSequenceCounter},
};

/// Travel-document application identifier
pub const BAC_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01];

/// Short file identifier of EF.DG1
pub const DG1_SFI: u8 = 0x01;

const INS_SELECT: u8 = 0xA4;
const INS_GET_CHALLENGE: u8 = 0x84;
const INS_EXTERNAL_AUTHENTICATE: u8 = 0x82;
const INS_READ_BINARY: u8 = 0xB0;

const CRYPTOGRAM_LEN: usize = 32;
const CRYPTOGRAM_WITH_MAC_LEN: u8 = 0x28;

/// The MRZ fields that make up the BAC key seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrzInfo {
    document_number: String,
    date_of_birth: String,
    date_of_expiry: String,
}

impl MrzInfo {
    /// Validate and store the MRZ fields
    ///
    /// Dates are `YYMMDD`. The document number is padded with `<` to nine characters.
    pub fn new(document_number: &str, date_of_birth: &str, date_of_expiry: &str) -> Result<Self> {
        let mut document_number = document_number.to_ascii_uppercase();
        while document_number.len() < 9 {
            document_number.push('<');
        }
        if !document_number.chars().all(|c| mrz_value(c).is_some()) {
            return Err(Error::Config("document number contains invalid characters"));
        }
        for date in [date_of_birth, date_of_expiry] {
            if date.len() != 6 || !date.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::Config("MRZ dates must be YYMMDD"));
            }
        }

        Ok(Self {
            document_number,
            date_of_birth: date_of_birth.to_string(),
            date_of_expiry: date_of_expiry.to_string(),
        })
    }

    /// Key seed material: each field followed by its check digit
    pub fn key_seed_material(&self) -> String {
        let mut material = String::with_capacity(24);
        for field in [
            &self.document_number,
            &self.date_of_birth,
            &self.date_of_expiry,
        ] {
            material.push_str(field);
            material.push(char::from(b'0' + check_digit(field)));
        }
        material
    }

    /// Derive the document encryption and MAC keys
    pub fn document_keys(&self) -> Result<(Key128, Key128)> {
        let mut material = self.key_seed_material();
        let keys = KdfStrategy::for_static_keys(Scheme::Bac, CipherSuite::TwoKeyTripleDes)
            .derive_pair(&DerivationInput::from_secret(material.as_bytes()));
        material.zeroize();
        keys
    }
}

/// ICAO check digit with repeating weights 7, 3, 1
pub fn check_digit(field: &str) -> u8 {
    const WEIGHTS: [u32; 3] = [7, 3, 1];
    let sum: u32 = field
        .chars()
        .zip(WEIGHTS.iter().cycle())
        .map(|(c, weight)| mrz_value(c).unwrap_or(0) * weight)
        .sum();
    (sum % 10) as u8
}

fn mrz_value(c: char) -> Option<u32> {
    match c {
        '<' => Some(0),
        '0'..='9' => c.to_digit(10),
        'A'..='Z' => Some(u32::from(c as u8 - b'A') + 10),
        _ => None,
    }
}

/// Derive the BAC session channel from both key halves
fn session_channel(
    reader_key: &[u8; 16],
    card_key: &[u8; 16],
    card_random: &[u8; 8],
    reader_nonce: &[u8; 8],
) -> Result<SecureChannel> {
    let seed = Key128::new(*reader_key).xor(&Key128::new(*card_key));
    let kdf = HashKdf::sha1();
    let enc = kdf.derive_from_seed(seed.as_bytes(), KeyPurpose::Encryption)?;
    let mac = kdf.derive_from_seed(seed.as_bytes(), KeyPurpose::Mac)?;

    let mut counter = [0u8; 8];
    counter[..4].copy_from_slice(&card_random[4..]);
    counter[4..].copy_from_slice(&reader_nonce[4..]);

    Ok(SecureChannel::bac(enc, mac, SendSequenceCounter::from_be_bytes(counter)))
}

fn new_parameters() -> AuthParameters {
    AuthParameters::new(CipherSuite::TwoKeyTripleDes, HashAlgorithm::Sha1, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderStep {
    Select,
    GetChallenge,
    ExternalAuthenticate,
    Done,
}

/// Reader half of BAC
#[derive(Debug)]
pub struct BacReader {
    k_enc: Key128,
    k_mac: Key128,
    reader_nonce: Option<[u8; 8]>,
    reader_key: Option<[u8; 16]>,
    step: ReaderStep,
}

impl BacReader {
    /// Reader holding the document keys
    pub const fn new(k_enc: Key128, k_mac: Key128) -> Self {
        Self {
            k_enc,
            k_mac,
            reader_nonce: None,
            reader_key: None,
            step: ReaderStep::Select,
        }
    }

    /// Reader for the document described by `mrz`
    pub fn from_mrz(mrz: &MrzInfo) -> Result<Self> {
        let (k_enc, k_mac) = mrz.document_keys()?;
        Ok(Self::new(k_enc, k_mac))
    }

    /// Skip the application selection (the application is already selected)
    pub const fn without_select(mut self) -> Self {
        self.step = ReaderStep::GetChallenge;
        self
    }

    /// Use fixed `rndIFD` and `K.IFD` instead of fresh random values
    pub const fn with_reader_randoms(mut self, nonce: [u8; 8], key: [u8; 16]) -> Self {
        self.reader_nonce = Some(nonce);
        self.reader_key = Some(key);
        self
    }
}

impl ReaderAuthenticator for BacReader {
    fn scheme(&self) -> Scheme {
        Scheme::Bac
    }

    fn next_command(&mut self, ctx: &mut ProtocolContext) -> Result<Command> {
        match self.step {
            ReaderStep::Select => {
                ctx.begin(new_parameters());
                Ok(Command::new_with_data(0x00, INS_SELECT, 0x04, 0x0C, BAC_AID.to_vec()))
            }
            ReaderStep::GetChallenge => {
                if ctx.params().is_err() {
                    ctx.begin(new_parameters());
                }
                ctx.advance(AuthState::Challenge1)?;
                Ok(Command::new(0x00, INS_GET_CHALLENGE, 0x00, 0x00).with_le(0x08))
            }
            ReaderStep::ExternalAuthenticate => {
                let params = ctx.params_mut()?;
                params.reader_nonce = fixed_or_random(self.reader_nonce);
                params.reader_key = fixed_or_random(self.reader_key);

                let mut s = [0u8; CRYPTOGRAM_LEN];
                s[..8].copy_from_slice(&params.reader_nonce);
                s[8..16].copy_from_slice(&params.card_random);
                s[16..].copy_from_slice(&params.reader_key);
                let cryptogram = seal_cryptogram(
                    MacAlgorithm::RetailMac,
                    CipherSuite::TwoKeyTripleDes,
                    &self.k_enc,
                    &self.k_mac,
                    &s,
                );
                s.zeroize();

                ctx.advance(AuthState::Challenge2)?;
                Ok(
                    Command::new_with_data(0x00, INS_EXTERNAL_AUTHENTICATE, 0x00, 0x00, cryptogram?)
                        .with_le(CRYPTOGRAM_WITH_MAC_LEN),
                )
            }
            ReaderStep::Done => Err(Error::Protocol("authentication already concluded")),
        }
    }

    fn handle_response(&mut self, ctx: &mut ProtocolContext, response: &Response) -> Result<()> {
        let payload = success_payload(response)?;
        match self.step {
            ReaderStep::Select => {
                debug!("Travel-document application selected");
                self.step = ReaderStep::GetChallenge;
            }
            ReaderStep::GetChallenge => {
                let card_random: [u8; 8] = payload
                    .try_into()
                    .map_err(|_| Error::Protocol("challenge must be 8 bytes"))?;
                trace!(rnd_icc = %hex::encode(card_random), "Received card challenge");
                ctx.params_mut()?.card_random = card_random;
                self.step = ReaderStep::ExternalAuthenticate;
            }
            ReaderStep::ExternalAuthenticate => {
                let mut clear = open_cryptogram(
                    MacAlgorithm::RetailMac,
                    CipherSuite::TwoKeyTripleDes,
                    &self.k_enc,
                    &self.k_mac,
                    payload,
                    CRYPTOGRAM_LEN,
                )?;

                let params = ctx.params()?;
                let channel = if clear[..8] != params.card_random {
                    Err(Error::EchoMismatch("card challenge"))
                } else if clear[8..16] != params.reader_nonce {
                    Err(Error::EchoMismatch("reader nonce"))
                } else {
                    let mut card_key = [0u8; 16];
                    card_key.copy_from_slice(&clear[16..]);
                    let channel = session_channel(
                        &params.reader_key,
                        &card_key,
                        &params.card_random,
                        &params.reader_nonce,
                    );
                    card_key.zeroize();
                    channel
                };
                clear.zeroize();

                ctx.establish(channel?);
                self.step = ReaderStep::Done;
            }
            ReaderStep::Done => return Err(Error::Protocol("unexpected response")),
        }
        Ok(())
    }

    fn read_object_command(&self) -> Command {
        Command::new(0x00, INS_READ_BINARY, 0x80 | DG1_SFI, 0x00).with_le(0x00)
    }

    fn extract_object(&self, response: &Response) -> Result<Bytes> {
        success_payload(response)?;
        Ok(Bytes::copy_from_slice(response.payload()))
    }
}

/// Credential half of BAC, emulating a travel document
#[derive(Debug)]
pub struct BacCredential {
    k_enc: Key128,
    k_mac: Key128,
    card_random: Option<[u8; 8]>,
    card_key: Option<[u8; 16]>,
    dg1: Bytes,
}

impl BacCredential {
    /// Credential holding the document keys and the content of EF.DG1
    pub fn new(k_enc: Key128, k_mac: Key128, dg1: impl Into<Bytes>) -> Self {
        Self {
            k_enc,
            k_mac,
            card_random: None,
            card_key: None,
            dg1: dg1.into(),
        }
    }

    /// Credential for the document described by `mrz`
    pub fn from_mrz(mrz: &MrzInfo, dg1: impl Into<Bytes>) -> Result<Self> {
        let (k_enc, k_mac) = mrz.document_keys()?;
        Ok(Self::new(k_enc, k_mac, dg1))
    }

    /// Use fixed `rndICC` and `K.ICC` instead of fresh random values
    pub const fn with_card_randoms(mut self, challenge: [u8; 8], key: [u8; 16]) -> Self {
        self.card_random = Some(challenge);
        self.card_key = Some(key);
        self
    }

    fn read_binary(&self, request: &Command) -> Response {
        let offset = if request.p1 & 0x80 != 0 {
            if request.p1 & 0x1F != DG1_SFI {
                return Response::status_only(StatusWord::FILE_NOT_FOUND);
            }
            usize::from(request.p2)
        } else {
            usize::from(u16::from_be_bytes([request.p1 & 0x7F, request.p2]))
        };
        if offset > self.dg1.len() {
            return Response::status_only(StatusWord::INCORRECT_P1P2);
        }

        let available = self.dg1.len() - offset;
        let wanted = match request.le {
            Some(0) | None => 256,
            Some(le) => usize::from(le),
        };
        Response::success(self.dg1.slice(offset..offset + available.min(wanted)))
    }
}

impl CredentialAuthenticator for BacCredential {
    fn scheme(&self) -> Scheme {
        Scheme::Bac
    }

    fn select_application(
        &mut self,
        ctx: &mut ProtocolContext,
        command: &Command,
    ) -> Result<Response> {
        if command.data() != Some(&BAC_AID[..]) {
            return Ok(Response::status_only(StatusWord::FILE_NOT_FOUND));
        }
        ctx.teardown();
        Ok(Response::status_only(StatusWord::SUCCESS))
    }

    fn challenge(&mut self, ctx: &mut ProtocolContext, _command: &Command) -> Result<Response> {
        ctx.teardown();
        let mut params = new_parameters();
        params.card_random = fixed_or_random(self.card_random);
        let card_random = params.card_random;
        ctx.begin(params);
        ctx.advance(AuthState::Challenge1)?;
        Ok(Response::success(card_random.to_vec()))
    }

    fn authenticate(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response> {
        if ctx.state() != AuthState::Challenge1 {
            return Err(Error::Protocol("authentication out of sequence"));
        }
        let cryptogram = command
            .data()
            .ok_or(Error::Protocol("reader cryptogram missing"))?;
        let mut clear = open_cryptogram(
            MacAlgorithm::RetailMac,
            CipherSuite::TwoKeyTripleDes,
            &self.k_enc,
            &self.k_mac,
            cryptogram,
            CRYPTOGRAM_LEN,
        )?;

        let params = ctx.params_mut()?;
        if clear[8..16] != params.card_random {
            clear.zeroize();
            return Err(Error::EchoMismatch("card challenge"));
        }
        params.reader_nonce.copy_from_slice(&clear[..8]);
        params.reader_key.copy_from_slice(&clear[16..]);
        params.card_key = fixed_or_random(self.card_key);
        clear.zeroize();

        let mut r = [0u8; CRYPTOGRAM_LEN];
        r[..8].copy_from_slice(&params.card_random);
        r[8..16].copy_from_slice(&params.reader_nonce);
        r[16..].copy_from_slice(&params.card_key);
        let reply = seal_cryptogram(
            MacAlgorithm::RetailMac,
            CipherSuite::TwoKeyTripleDes,
            &self.k_enc,
            &self.k_mac,
            &r,
        );
        r.zeroize();
        let reply = reply?;

        let channel = session_channel(
            &params.reader_key,
            &params.card_key,
            &params.card_random,
            &params.reader_nonce,
        )?;
        ctx.advance(AuthState::Challenge2)?;
        ctx.establish(channel);
        Ok(Response::success(reply))
    }

    fn serve(&mut self, request: &Command) -> Response {
        match request.ins {
            INS_READ_BINARY => self.read_binary(request),
            _ => Response::status_only(StatusWord::INS_NOT_SUPPORTED),
        }
    }
}
