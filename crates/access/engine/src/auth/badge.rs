//! Diversified-key access badge
//!
//! The reader selects the badge application and then the application data file (ADF) by
//! object identifier. The credential answers with the negotiated cipher and hash and an
//! encrypted, CMAC-protected record holding its diversifier. Both sides derive the static
//! privacy and authentication keys from the ADF read key, the object identifier, the
//! diversifier and the key slot, run a two-step GENERAL AUTHENTICATE, and derive the session
//! keys from the exchanged nonces.

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
    crypto::{
        CipherSuite, HashAlgorithm, Key128, MacAlgorithm, cmac, decrypt_cbc, encrypt_cbc,
        mac_matches,
    },
    kdf::{DerivationInput, IteratedHashKdf, KdfStrategy, KeyDerivation},
    secure_channel::{SecureChannel, SendSequenceCounter},
    tlv,
};

/// Badge application identifier
pub const BADGE_AID: [u8; 10] = [0xA0, 0x00, 0x00, 0x04, 0x40, 0x00, 0x01, 0x01, 0x00, 0x01];

/// Object identifier of the default access-control ADF
pub const DEFAULT_OBJECT_ID: [u8; 17] = [
    0x2B, 0x06, 0x01, 0x04, 0x01, 0x81, 0xE4, 0x38, 0x01, 0x01, 0x02, 0x01, 0x18, 0x01, 0x01,
    0x02, 0x02,
];

/// Reader identifier used when none is configured
pub const DEFAULT_READER_UID: [u8; 8] = [0x0D; 8];

/// Key slot used when none is configured
pub const DEFAULT_KEY_NO: u8 = 0x01;

const INS_SELECT: u8 = 0xA4;
const INS_SELECT_ADF: u8 = 0xA5;
const INS_GENERAL_AUTHENTICATE: u8 = 0x87;
const INS_GET_DATA: u8 = 0xCB;

const TAG_FCI: u8 = 0x6F;
const TAG_DF_NAME: u8 = 0x84;
const TAG_OBJECT_ID: u8 = 0x06;
const TAG_DIVERSIFIER: u8 = 0xCF;
const TAG_ALGORITHMS: u8 = 0xCD;
const TAG_ENCRYPTED: u8 = 0x85;
const TAG_MAC: u8 = 0x8E;
const TAG_DYNAMIC_AUTH: u8 = 0x7C;
const TAG_CHALLENGE: u8 = 0x81;
const TAG_RESPONSE: u8 = 0x82;

/// Clear length of the ADF record before encryption
const ADF_RECORD_LEN: usize = 0x30;
const CRYPTOGRAM_LEN: usize = 32;

/// Tag list requesting the secure identity object
const SIO_TAG_LIST: [u8; 4] = [0x5C, 0x02, 0xFF, 0x00];
const SIO_FILE_ID: [u8; 2] = [0xFF, 0x00];

/// The static secrets of a badge application
#[derive(Debug, Clone)]
pub struct BadgeKeyset {
    /// ADF read (master) key
    pub read_key: Key128,
    /// Encrypts the ADF selection record
    pub privacy_enc: Key128,
    /// Authenticates the ADF selection record
    pub privacy_mac: Key128,
}

impl BadgeKeyset {
    /// Static privacy and authentication keys for one credential
    fn static_keys(
        &self,
        suite: CipherSuite,
        object_id: &[u8],
        diversifier: &[u8],
        key_no: u8,
    ) -> Result<(Key128, Key128)> {
        KdfStrategy::for_static_keys(Scheme::Badge, suite).derive_pair(&DerivationInput {
            secret: self.read_key.as_bytes(),
            object_id,
            diversifier,
            key_index: key_no,
        })
    }
}

/// Split the leading `tag`/length/value record off `input`
fn take_record(input: &[u8], tag: u8) -> Result<(&[u8], &[u8])> {
    match input {
        [t, len, rest @ ..] if *t == tag && rest.len() >= usize::from(*len) => {
            Ok(rest.split_at(usize::from(*len)))
        }
        _ => Err(Error::Protocol("malformed ADF record")),
    }
}

/// Synthetic IV: a random half block followed by the first half of its CMAC
fn adf_iv(suite: CipherSuite, privacy_mac: &Key128, random: &[u8]) -> Result<Vec<u8>> {
    let half = suite.block_size() / 2;
    let mut iv = random[..half].to_vec();
    iv.extend_from_slice(&cmac(suite, privacy_mac, &iv)?[..half]);
    Ok(iv)
}

/// Session keys and counter from the exchanged nonces
fn session_channel(params: &AuthParameters) -> Result<SecureChannel> {
    let mut context = IteratedHashKdf::context(
        &params.reader_nonce,
        &params.card_nonce,
        params.suite,
        &params.card_random,
        &params.uid,
    );
    let keys = KdfStrategy::for_session_keys(Scheme::Badge, params.hash)
        .derive_pair(&DerivationInput::from_secret(&context));
    context.zeroize();
    let (enc, mac) = keys?;

    let counter = match params.suite {
        CipherSuite::TwoKeyTripleDes => {
            let mut start = [0u8; 8];
            start[..4].copy_from_slice(&params.card_random[..4]);
            start[4..].copy_from_slice(&params.uid[..4]);
            SendSequenceCounter::from_be_bytes(start)
        }
        CipherSuite::Aes128 => {
            SendSequenceCounter::with_prefix(params.card_random, u64::from_be_bytes(params.uid))
        }
    };

    Ok(SecureChannel::badge(params.suite, enc, mac, counter))
}

fn select_adf_command(object_id: &[u8]) -> Result<Command> {
    Ok(
        Command::new_with_data(0x80, INS_SELECT_ADF, 0x04, 0x00, tlv::primitive(TAG_OBJECT_ID, object_id)?)
            .with_le(0x00),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderStep {
    SelectApplication,
    SelectAdf,
    Challenge,
    Authenticate,
    Done,
}

/// Reader half of the badge scheme
#[derive(Debug)]
pub struct BadgeReader {
    keyset: BadgeKeyset,
    object_id: Vec<u8>,
    key_no: u8,
    uid: [u8; 8],
    reader_nonce: Option<[u8; 8]>,
    step: ReaderStep,
}

impl BadgeReader {
    /// Reader for the ADF `object_id`
    pub fn new(keyset: BadgeKeyset, object_id: impl Into<Vec<u8>>) -> Self {
        Self {
            keyset,
            object_id: object_id.into(),
            key_no: DEFAULT_KEY_NO,
            uid: DEFAULT_READER_UID,
            reader_nonce: None,
            step: ReaderStep::SelectApplication,
        }
    }

    /// Authenticate against key slot `key_no`
    pub const fn with_key_no(mut self, key_no: u8) -> Self {
        self.key_no = key_no;
        self
    }

    /// Identify the reader with `uid`
    pub const fn with_uid(mut self, uid: [u8; 8]) -> Self {
        self.uid = uid;
        self
    }

    /// Use a fixed reader nonce instead of fresh random bytes
    pub const fn with_reader_nonce(mut self, nonce: [u8; 8]) -> Self {
        self.reader_nonce = Some(nonce);
        self
    }

    fn accept_adf(&self, ctx: &mut ProtocolContext, payload: &[u8]) -> Result<()> {
        let objects = tlv::parse_objects(payload)?;
        let [algorithms, encrypted, mac] = objects.as_slice() else {
            return Err(Error::Protocol("unexpected ADF selection reply"));
        };
        if !algorithms.has_tag(TAG_ALGORITHMS)
            || !encrypted.has_tag(TAG_ENCRYPTED)
            || !mac.has_tag(TAG_MAC)
        {
            return Err(Error::Protocol("unexpected ADF selection reply"));
        }

        let (suite, hash) = match algorithms.primitive()? {
            [cipher, hash] => (CipherSuite::try_from(*cipher)?, HashAlgorithm::try_from(*hash)?),
            _ => return Err(Error::Protocol("algorithm object must be 2 bytes")),
        };

        let mut covered = algorithms.raw.to_vec();
        covered.extend_from_slice(encrypted.raw);
        let expected = cmac(suite, &self.keyset.privacy_mac, &covered)?;
        if !mac_matches(&expected, mac.primitive()?) {
            return Err(Error::Integrity("ADF selection MAC"));
        }

        let block_size = suite.block_size();
        let record = encrypted.primitive()?;
        if record.len() <= block_size {
            return Err(Error::Protocol("ADF record too short"));
        }
        let (iv, ciphertext) = record.split_at(block_size);
        if iv != adf_iv(suite, &self.keyset.privacy_mac, iv)? {
            return Err(Error::Integrity("ADF selection IV"));
        }

        let mut clear = decrypt_cbc(suite, &self.keyset.privacy_enc, iv, ciphertext)?;
        let (object_id, rest) = take_record(&clear, TAG_OBJECT_ID)?;
        if object_id != self.object_id.as_slice() {
            clear.zeroize();
            return Err(Error::Protocol("ADF object identifier mismatch"));
        }
        let (diversifier, _) = take_record(rest, TAG_DIVERSIFIER)?;
        let diversifier = diversifier.to_vec();
        clear.zeroize();

        debug!(%suite, %hash, diversifier = %hex::encode(&diversifier), "ADF selected");

        let (priv_key, auth_key) =
            self.keyset
                .static_keys(suite, &self.object_id, &diversifier, self.key_no)?;
        let mut params = AuthParameters::new(suite, hash, self.key_no);
        params.uid = self.uid;
        params.diversifier = diversifier;
        params.set_static_keys(priv_key, auth_key);
        ctx.begin(params);
        Ok(())
    }
}

impl ReaderAuthenticator for BadgeReader {
    fn scheme(&self) -> Scheme {
        Scheme::Badge
    }

    fn next_command(&mut self, ctx: &mut ProtocolContext) -> Result<Command> {
        match self.step {
            ReaderStep::SelectApplication => {
                Ok(Command::new_with_data(0x00, INS_SELECT, 0x04, 0x00, BADGE_AID.to_vec())
                    .with_le(0x00))
            }
            ReaderStep::SelectAdf => select_adf_command(&self.object_id),
            ReaderStep::Challenge => {
                ctx.advance(AuthState::Challenge1)?;
                let data = tlv::wrapped(TAG_DYNAMIC_AUTH, TAG_CHALLENGE, &[])?;
                Ok(
                    Command::new_with_data(0x00, INS_GENERAL_AUTHENTICATE, 0x00, self.key_no, data)
                        .with_le(0x00),
                )
            }
            ReaderStep::Authenticate => {
                let params = ctx.params_mut()?;
                params.reader_nonce = fixed_or_random(self.reader_nonce);

                let mut clear = [0u8; CRYPTOGRAM_LEN];
                clear[..8].copy_from_slice(&params.uid);
                clear[8..16].copy_from_slice(&params.card_random);
                clear[16..24].copy_from_slice(&params.reader_nonce);
                let (priv_key, auth_key) = params.static_keys()?;
                let cryptogram =
                    seal_cryptogram(MacAlgorithm::Cmac, params.suite, priv_key, auth_key, &clear);
                clear.zeroize();
                let data = tlv::wrapped(TAG_DYNAMIC_AUTH, TAG_RESPONSE, &cryptogram?)?;

                ctx.advance(AuthState::Challenge2)?;
                Ok(
                    Command::new_with_data(0x00, INS_GENERAL_AUTHENTICATE, 0x00, self.key_no, data)
                        .with_le(0x00),
                )
            }
            ReaderStep::Done => Err(Error::Protocol("authentication already concluded")),
        }
    }

    fn handle_response(&mut self, ctx: &mut ProtocolContext, response: &Response) -> Result<()> {
        let payload = success_payload(response)?;
        match self.step {
            ReaderStep::SelectApplication => {
                let name = tlv::nested_value(payload, TAG_FCI, TAG_DF_NAME)?;
                if name != BADGE_AID {
                    return Err(Error::Protocol("unexpected application selected"));
                }
                self.step = ReaderStep::SelectAdf;
            }
            ReaderStep::SelectAdf => {
                self.accept_adf(ctx, payload)?;
                self.step = ReaderStep::Challenge;
            }
            ReaderStep::Challenge => {
                let card_random: [u8; 8] =
                    tlv::nested_value(payload, TAG_DYNAMIC_AUTH, TAG_CHALLENGE)?
                        .try_into()
                        .map_err(|_| Error::Protocol("challenge must be 8 bytes"))?;
                trace!(rnd_icc = %hex::encode(card_random), "Received card challenge");
                ctx.params_mut()?.card_random = card_random;
                self.step = ReaderStep::Authenticate;
            }
            ReaderStep::Authenticate => {
                let cryptogram = tlv::nested_value(payload, TAG_DYNAMIC_AUTH, TAG_RESPONSE)?;
                let params = ctx.params_mut()?;
                let (priv_key, auth_key) = params.static_keys()?;
                let mut clear = open_cryptogram(
                    MacAlgorithm::Cmac,
                    params.suite,
                    priv_key,
                    auth_key,
                    &cryptogram,
                    CRYPTOGRAM_LEN,
                )?;

                let echoed = if clear[..8] != params.card_random {
                    Err(Error::EchoMismatch("card challenge"))
                } else if clear[8..16] != params.uid {
                    Err(Error::EchoMismatch("reader identifier"))
                } else {
                    params.card_nonce.copy_from_slice(&clear[16..24]);
                    Ok(())
                };
                clear.zeroize();
                echoed?;

                let channel = session_channel(params)?;
                ctx.establish(channel);
                self.step = ReaderStep::Done;
            }
            ReaderStep::Done => return Err(Error::Protocol("unexpected response")),
        }
        Ok(())
    }

    fn read_object_command(&self) -> Command {
        Command::new_with_data(0x00, INS_GET_DATA, 0x3F, 0xFF, SIO_TAG_LIST.to_vec()).with_le(0x00)
    }

    fn extract_object(&self, response: &Response) -> Result<Bytes> {
        match success_payload(response)? {
            [0xFF, 0x00, len, sio @ ..] if sio.len() == usize::from(*len) => {
                Ok(Bytes::copy_from_slice(sio))
            }
            _ => Err(Error::Protocol("malformed identity object")),
        }
    }
}

/// Credential half of the badge scheme
#[derive(Debug)]
pub struct BadgeCredential {
    keyset: BadgeKeyset,
    object_id: Vec<u8>,
    diversifier: Vec<u8>,
    suite: CipherSuite,
    hash: HashAlgorithm,
    sio: Bytes,
    adf_random: Option<[u8; 8]>,
    card_random: Option<[u8; 8]>,
    card_nonce: Option<[u8; 8]>,
}

impl BadgeCredential {
    /// Credential serving `sio` from the ADF `object_id`
    pub fn new(
        keyset: BadgeKeyset,
        object_id: impl Into<Vec<u8>>,
        diversifier: impl Into<Vec<u8>>,
        sio: impl Into<Bytes>,
    ) -> Self {
        Self {
            keyset,
            object_id: object_id.into(),
            diversifier: diversifier.into(),
            suite: CipherSuite::Aes128,
            hash: HashAlgorithm::Sha1,
            sio: sio.into(),
            adf_random: None,
            card_random: None,
            card_nonce: None,
        }
    }

    /// Offer `suite` and `hash` in the ADF selection reply
    pub const fn with_algorithms(mut self, suite: CipherSuite, hash: HashAlgorithm) -> Self {
        self.suite = suite;
        self.hash = hash;
        self
    }

    /// Use fixed randoms (ADF IV seed, `rndICC`, `rNonce`) instead of fresh random bytes
    pub const fn with_card_randoms(
        mut self,
        adf_random: [u8; 8],
        card_random: [u8; 8],
        card_nonce: [u8; 8],
    ) -> Self {
        self.adf_random = Some(adf_random);
        self.card_random = Some(card_random);
        self.card_nonce = Some(card_nonce);
        self
    }

    fn adf_reply(&self) -> Result<Vec<u8>> {
        let block_size = self.suite.block_size();
        let mut record = tlv::primitive(TAG_OBJECT_ID, &self.object_id)?;
        record.extend_from_slice(&tlv::primitive(TAG_DIVERSIFIER, &self.diversifier)?);
        record.resize(ADF_RECORD_LEN.max(record.len().next_multiple_of(block_size)), 0x00);

        let iv = adf_iv(self.suite, &self.keyset.privacy_mac, &fixed_or_random(self.adf_random))?;
        let mut encrypted = iv.clone();
        encrypted.extend_from_slice(&encrypt_cbc(
            self.suite,
            &self.keyset.privacy_enc,
            &iv,
            &record,
        )?);
        record.zeroize();

        let mut reply = tlv::primitive(TAG_ALGORITHMS, &[self.suite.selector(), self.hash.selector()])?;
        reply.extend_from_slice(&tlv::primitive(TAG_ENCRYPTED, &encrypted)?);
        let mac = cmac(self.suite, &self.keyset.privacy_mac, &reply)?;
        reply.extend_from_slice(&tlv::primitive(TAG_MAC, &mac)?);
        Ok(reply)
    }
}

impl CredentialAuthenticator for BadgeCredential {
    fn scheme(&self) -> Scheme {
        Scheme::Badge
    }

    fn select_application(
        &mut self,
        ctx: &mut ProtocolContext,
        command: &Command,
    ) -> Result<Response> {
        if command.data() != Some(&BADGE_AID[..]) {
            return Ok(Response::status_only(StatusWord::FILE_NOT_FOUND));
        }
        ctx.teardown();
        Ok(Response::success(tlv::wrapped(TAG_FCI, TAG_DF_NAME, &BADGE_AID)?))
    }

    fn select_adf(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response> {
        let data = command
            .data()
            .ok_or(Error::Protocol("object identifier missing"))?;
        let (object_id, _) = take_record(data, TAG_OBJECT_ID)?;
        if object_id != self.object_id.as_slice() {
            return Ok(Response::status_only(StatusWord::FILE_NOT_FOUND));
        }

        ctx.teardown();
        let mut params = AuthParameters::new(self.suite, self.hash, DEFAULT_KEY_NO);
        params.diversifier = self.diversifier.clone();
        ctx.begin(params);
        Ok(Response::success(self.adf_reply()?))
    }

    fn challenge(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response> {
        if ctx.state() != AuthState::Idle {
            return Err(Error::Protocol("challenge out of sequence"));
        }
        let params = ctx.params_mut()?;
        let (priv_key, auth_key) =
            self.keyset
                .static_keys(params.suite, &self.object_id, &params.diversifier, command.p2)?;
        params.key_no = command.p2;
        params.set_static_keys(priv_key, auth_key);
        params.card_random = fixed_or_random(self.card_random);
        let reply = tlv::wrapped(TAG_DYNAMIC_AUTH, TAG_CHALLENGE, &params.card_random)?;

        ctx.advance(AuthState::Challenge1)?;
        Ok(Response::success(reply))
    }

    fn authenticate(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response> {
        if ctx.state() != AuthState::Challenge1 {
            return Err(Error::Protocol("authentication out of sequence"));
        }
        let data = command
            .data()
            .ok_or(Error::Protocol("reader cryptogram missing"))?;
        let cryptogram = tlv::nested_value(data, TAG_DYNAMIC_AUTH, TAG_RESPONSE)?;

        let params = ctx.params_mut()?;
        let (priv_key, auth_key) = {
            let (priv_key, auth_key) = params.static_keys()?;
            (priv_key.clone(), auth_key.clone())
        };
        let mut clear = open_cryptogram(
            MacAlgorithm::Cmac,
            params.suite,
            &priv_key,
            &auth_key,
            &cryptogram,
            CRYPTOGRAM_LEN,
        )?;
        if clear[8..16] != params.card_random {
            clear.zeroize();
            return Err(Error::EchoMismatch("card challenge"));
        }
        params.uid.copy_from_slice(&clear[..8]);
        params.reader_nonce.copy_from_slice(&clear[16..24]);
        params.card_nonce = fixed_or_random(self.card_nonce);
        clear.zeroize();

        let mut reply = [0u8; CRYPTOGRAM_LEN];
        reply[..8].copy_from_slice(&params.card_random);
        reply[8..16].copy_from_slice(&params.uid);
        reply[16..24].copy_from_slice(&params.card_nonce);
        let sealed = seal_cryptogram(MacAlgorithm::Cmac, params.suite, &priv_key, &auth_key, &reply);
        reply.zeroize();
        let reply = tlv::wrapped(TAG_DYNAMIC_AUTH, TAG_RESPONSE, &sealed?)?;

        let channel = session_channel(params)?;
        ctx.advance(AuthState::Challenge2)?;
        ctx.establish(channel);
        Ok(Response::success(reply))
    }

    fn serve(&mut self, request: &Command) -> Response {
        match (request.ins, request.data()) {
            (INS_GET_DATA, Some(tags)) if tags == SIO_TAG_LIST => {
                let Ok(len) = u8::try_from(self.sio.len()) else {
                    return Response::status_only(StatusWord::WRONG_LENGTH);
                };
                let mut reply = Vec::with_capacity(3 + self.sio.len());
                reply.extend_from_slice(&SIO_FILE_ID);
                reply.push(len);
                reply.extend_from_slice(&self.sio);
                Response::success(reply)
            }
            (INS_GET_DATA, _) => Response::status_only(StatusWord::FILE_NOT_FOUND),
            _ => Response::status_only(StatusWord::INS_NOT_SUPPORTED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;
    use hex_literal::hex;

    const DIVERSIFIER: [u8; 8] = hex!("0102030405060708");
    const RND_ICC: [u8; 8] = hex!("018CDE7D6049EDB0");
    const R_NONCE: [u8; 8] = hex!("A1A2A3A4A5A6A7A8");
    const C_NONCE: [u8; 8] = [0x0C; 8];
    const SIO: [u8; 12] = hex!("300A8108AABBCCDDEEFF0011");

    struct Vectors {
        suite: CipherSuite,
        adf_reply: &'static [u8],
        reader_cryptogram: &'static [u8],
        card_cryptogram: &'static [u8],
        protected_get_data: &'static [u8],
    }

    const TDES: Vectors = Vectors {
        suite: CipherSuite::TwoKeyTripleDes,
        adf_reply: &hex!(
            "CD020206853800000000E5170B5D611CCB6C466AA332B69E2C140780298443FCB297B72A5131E36C3FD3"
            "4B06B9A83976143FE1623D399A9278C67D699E0B8E0851DC11755B57A57D"
        ),
        reader_cryptogram: &hex!(
            "19F0CDCB0BE4DE9B236DE0BF0BEEB43CE0B8ACDFA011B4FFF2944A487254CE85AF5A0B808D712500"
        ),
        card_cryptogram: &hex!(
            "0C6811536A9E20625F13BAB7AB59145688500BC3CC2ACFC6C0E26D7A945C670ACB0243729E1561A3"
        ),
        protected_get_data: &hex!("0CCB3FFF1785084C05744BB8C22F879701008E08757F406AB99936B900"),
    };

    const AES: Vectors = Vectors {
        suite: CipherSuite::Aes128,
        adf_reply: &hex!(
            "CD0209068540000000000000000021E15F1F87567AEBCC43C0DE3BC7A4CA2E85CB5B825AFA6AAFB4DC22"
            "82424144C93F5E29245CABB19047BA9BCDD23AA5D7C51681A022D2AF8E08D94236F30C61769D"
        ),
        reader_cryptogram: &hex!(
            "F2F688D718096DCBE03800A6EDB1B3EE74846CF1D96CAC3538266BF35333F88F3FB06C560BFEA4FA"
        ),
        card_cryptogram: &hex!(
            "4EDDB685B239FE18D0231E2E9FFC46D7673E8D30A069431B89894AB78224018A25F1EF5C6BAB363A"
        ),
        protected_get_data: &hex!(
            "0CCB3FFF1F851099BEB80C070F7ACD908C23B5887431439701008E081E901FFDBB2265B500"
        ),
    };

    fn keyset() -> BadgeKeyset {
        BadgeKeyset {
            read_key: Key128::new(hex!("00112233445566778899AABBCCDDEEFF")),
            privacy_enc: Key128::new(hex!("0102030405060708090A0B0C0D0E0F10")),
            privacy_mac: Key128::new(hex!("1112131415161718191A1B1C1D1E1F20")),
        }
    }

    fn with_success(payload: &[u8]) -> Response {
        Response::success(payload.to_vec())
    }

    fn dynamic_auth(tag: u8, value: &[u8]) -> Vec<u8> {
        tlv::wrapped(TAG_DYNAMIC_AUTH, tag, value).unwrap()
    }

    fn run_reader(vectors: &Vectors) {
        let mut reader = BadgeReader::new(keyset(), DEFAULT_OBJECT_ID).with_reader_nonce(C_NONCE);
        let mut ctx = ProtocolContext::new(Role::Reader);

        let select = reader.next_command(&mut ctx).unwrap();
        assert_eq!(
            select.to_bytes().as_ref(),
            &hex!("00A404000AA000000440000101000100")
        );
        reader
            .handle_response(&mut ctx, &with_success(&hex!("6F0C840AA0000004400001010001")))
            .unwrap();

        let select_adf = reader.next_command(&mut ctx).unwrap();
        assert_eq!(
            select_adf.to_bytes().as_ref(),
            &hex!("80A50400130611 2B0601040181E438010102011801010202 00")
        );
        reader
            .handle_response(&mut ctx, &with_success(vectors.adf_reply))
            .unwrap();
        assert_eq!(ctx.params().unwrap().suite, vectors.suite);
        assert_eq!(ctx.params().unwrap().diversifier, DIVERSIFIER);

        let challenge = reader.next_command(&mut ctx).unwrap();
        assert_eq!(challenge.to_bytes().as_ref(), &hex!("00870001047C02810000"));
        reader
            .handle_response(&mut ctx, &with_success(&dynamic_auth(TAG_CHALLENGE, &RND_ICC)))
            .unwrap();

        let authenticate = reader.next_command(&mut ctx).unwrap();
        let mut expected = hex!("008700012C7C2A8228").to_vec();
        expected.extend_from_slice(vectors.reader_cryptogram);
        expected.push(0x00);
        assert_eq!(authenticate.to_bytes().as_ref(), expected.as_slice());

        reader
            .handle_response(
                &mut ctx,
                &with_success(&dynamic_auth(TAG_RESPONSE, vectors.card_cryptogram)),
            )
            .unwrap();
        assert!(ctx.is_authenticated());
        assert!(ctx.params().is_err());

        let protected = ctx.wrap_command(&reader.read_object_command()).unwrap();
        assert_eq!(protected.to_bytes().as_ref(), vectors.protected_get_data);
    }

    fn run_credential(vectors: &Vectors) {
        let mut credential = BadgeCredential::new(keyset(), DEFAULT_OBJECT_ID, DIVERSIFIER, SIO.to_vec())
            .with_algorithms(vectors.suite, HashAlgorithm::Sha1)
            .with_card_randoms([0x00; 8], RND_ICC, R_NONCE);
        let mut ctx = ProtocolContext::new(Role::Credential);

        let select_adf = select_adf_command(&DEFAULT_OBJECT_ID).unwrap();
        let reply = credential.select_adf(&mut ctx, &select_adf).unwrap();
        assert_eq!(reply.payload(), vectors.adf_reply);

        let challenge = Command::new_with_data(0x00, 0x87, 0x00, 0x01, hex!("7C028100").to_vec())
            .with_le(0x00);
        let reply = credential.challenge(&mut ctx, &challenge).unwrap();
        assert_eq!(reply.payload(), &hex!("7C0A8108018CDE7D6049EDB0"));

        let authenticate = Command::new_with_data(
            0x00,
            0x87,
            0x00,
            0x01,
            dynamic_auth(TAG_RESPONSE, vectors.reader_cryptogram),
        )
        .with_le(0x00);
        let reply = credential.authenticate(&mut ctx, &authenticate).unwrap();
        assert_eq!(reply.payload(), dynamic_auth(TAG_RESPONSE, vectors.card_cryptogram));
        assert!(ctx.is_authenticated());

        let clear = ctx
            .unwrap_command(&Command::from_bytes(vectors.protected_get_data).unwrap())
            .unwrap();
        let served = credential.serve(&clear);
        assert_eq!(served.payload()[..3], hex!("FF000C"));
        assert_eq!(&served.payload()[3..], &SIO);
    }

    #[test]
    fn test_reader_tdes_known_answer() {
        run_reader(&TDES);
    }

    #[test]
    fn test_reader_aes_known_answer() {
        run_reader(&AES);
    }

    #[test]
    fn test_credential_tdes_known_answer() {
        run_credential(&TDES);
    }

    #[test]
    fn test_credential_aes_known_answer() {
        run_credential(&AES);
    }

    #[test]
    fn test_reader_rejects_tampered_adf_reply() {
        let mut tampered = TDES.adf_reply.to_vec();
        tampered[12] ^= 0x40;
        let mut reader = BadgeReader::new(keyset(), DEFAULT_OBJECT_ID);
        let mut ctx = ProtocolContext::new(Role::Reader);
        reader.next_command(&mut ctx).unwrap();
        reader
            .handle_response(&mut ctx, &with_success(&hex!("6F0C840AA0000004400001010001")))
            .unwrap();
        reader.next_command(&mut ctx).unwrap();
        assert!(matches!(
            reader.handle_response(&mut ctx, &with_success(&tampered)),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn test_reader_rejects_unknown_cipher() {
        let mut reply = TDES.adf_reply.to_vec();
        reply[2] = 0x03;
        let reader = BadgeReader::new(keyset(), DEFAULT_OBJECT_ID);
        let mut ctx = ProtocolContext::new(Role::Reader);
        assert!(matches!(
            reader.accept_adf(&mut ctx, &reply),
            Err(Error::UnsupportedAlgorithm(0x03))
        ));
    }

    #[test]
    fn test_credential_unknown_application() {
        let mut credential = BadgeCredential::new(keyset(), DEFAULT_OBJECT_ID, DIVERSIFIER, SIO.to_vec());
        let mut ctx = ProtocolContext::new(Role::Credential);
        let select = Command::new_with_data(0x00, 0xA4, 0x04, 0x00, hex!("A0000002471001").to_vec());
        let reply = credential.select_application(&mut ctx, &select).unwrap();
        assert_eq!(reply.status(), StatusWord::FILE_NOT_FOUND);

        let other_adf = select_adf_command(&hex!("2B0601040181E438010102011801010203")).unwrap();
        let reply = credential.select_adf(&mut ctx, &other_adf).unwrap();
        assert_eq!(reply.status(), StatusWord::FILE_NOT_FOUND);
    }

    #[test]
    fn test_challenge_requires_adf() {
        let mut credential = BadgeCredential::new(keyset(), DEFAULT_OBJECT_ID, DIVERSIFIER, SIO.to_vec());
        let mut ctx = ProtocolContext::new(Role::Credential);
        let challenge = Command::new_with_data(0x00, 0x87, 0x00, 0x01, hex!("7C028100").to_vec());
        assert!(credential.challenge(&mut ctx, &challenge).is_err());
    }

    #[test]
    fn test_extract_object() {
        let reader = BadgeReader::new(keyset(), DEFAULT_OBJECT_ID);
        let object = reader
            .extract_object(&with_success(&hex!("FF000C300A8108AABBCCDDEEFF0011")))
            .unwrap();
        assert_eq!(object.as_ref(), &SIO);
        assert!(reader.extract_object(&with_success(&hex!("FF0005300A"))).is_err());
        assert!(
            reader
                .extract_object(&Response::status_only(StatusWord::SECURITY_STATUS_NOT_SATISFIED))
                .is_err()
        );
    }
}
