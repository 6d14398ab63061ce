//! Mutual authentication
//!
//! Each scheme is split into two halves: a [`ReaderAuthenticator`] that produces the next
//! command and consumes the reply, and a [`CredentialAuthenticator`] that answers each
//! request. Both halves record progress in the shared [`ProtocolContext`] and install the
//! [`SecureChannel`](crate::SecureChannel) once the exchange has verified.
//!
//! ```text
//! Idle ──challenge──▶ Challenge1 ──cryptogram──▶ Challenge2 ──verified──▶ Authenticated
//!   │                    │                          │
//!   └────────────────────┴──────── any failure ─────┴──────────────────▶ Failed
//! ```

pub mod bac;
pub mod badge;

use std::fmt;

use bytes::Bytes;
use derive_more::Display;
use nexum_apdu_core::{Command, Response};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    Error, ProtocolContext, Result,
    crypto::{
        CipherSuite, HashAlgorithm, Key128, MAC_LEN, MacAlgorithm, cmac, decrypt_zero_iv,
        encrypt_zero_iv, iso_pad, mac_matches, random_bytes, retail_mac,
    },
};

/// The supported authentication schemes
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Basic Access Control for travel documents
    #[display("bac")]
    Bac,
    /// Diversified-key access badge
    #[default]
    #[display("badge")]
    Badge,
}

/// Progress of a mutual authentication
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthState {
    /// Nothing exchanged yet
    #[default]
    #[display("idle")]
    Idle,
    /// The card challenge was requested
    #[display("challenge-1")]
    Challenge1,
    /// The reader cryptogram was sent
    #[display("challenge-2")]
    Challenge2,
    /// Both sides verified; a secure channel exists
    #[display("authenticated")]
    Authenticated,
    /// Verification failed; the attempt is over
    #[display("failed")]
    Failed,
}

impl AuthState {
    /// Whether the state ends the attempt
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Authenticated | Self::Failed)
    }
}

/// Transient material of one authentication attempt
///
/// Created when the attempt starts and dropped (wiped) as soon as the channel is installed
/// or the attempt fails.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AuthParameters {
    /// Negotiated block cipher
    #[zeroize(skip)]
    pub suite: CipherSuite,
    /// Negotiated hash function
    #[zeroize(skip)]
    pub hash: HashAlgorithm,
    /// Key slot on the credential
    pub key_no: u8,
    /// Reader identifier (badge scheme)
    pub uid: [u8; 8],
    /// Reader nonce (`rndIFD`, `cNonce`)
    pub reader_nonce: [u8; 8],
    /// Card nonce (`rNonce`)
    pub card_nonce: [u8; 8],
    /// Card challenge (`rndICC`)
    pub card_random: [u8; 8],
    /// Reader key half (`K.IFD`)
    pub reader_key: [u8; 16],
    /// Card key half (`K.ICC`)
    pub card_key: [u8; 16],
    /// Diversifier announced by the credential
    pub diversifier: Vec<u8>,
    /// Static encryption key for the cryptograms
    pub priv_key: Option<Key128>,
    /// Static MAC key for the cryptograms
    pub auth_key: Option<Key128>,
}

impl AuthParameters {
    /// Parameters for a new attempt with the given algorithms
    pub const fn new(suite: CipherSuite, hash: HashAlgorithm, key_no: u8) -> Self {
        Self {
            suite,
            hash,
            key_no,
            uid: [0; 8],
            reader_nonce: [0; 8],
            card_nonce: [0; 8],
            card_random: [0; 8],
            reader_key: [0; 16],
            card_key: [0; 16],
            diversifier: Vec::new(),
            priv_key: None,
            auth_key: None,
        }
    }

    /// Install the static cryptogram keys
    pub fn set_static_keys(&mut self, priv_key: Key128, auth_key: Key128) {
        self.priv_key = Some(priv_key);
        self.auth_key = Some(auth_key);
    }

    /// The static cryptogram keys, once derived
    pub fn static_keys(&self) -> Result<(&Key128, &Key128)> {
        match (&self.priv_key, &self.auth_key) {
            (Some(priv_key), Some(auth_key)) => Ok((priv_key, auth_key)),
            _ => Err(Error::Protocol("static keys not derived")),
        }
    }
}

impl fmt::Debug for AuthParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthParameters")
            .field("suite", &self.suite)
            .field("hash", &self.hash)
            .field("key_no", &self.key_no)
            .finish_non_exhaustive()
    }
}

/// Reader half of a scheme
///
/// The driver alternates [`next_command`](Self::next_command) and
/// [`handle_response`](Self::handle_response) until the context reports
/// [`AuthState::Authenticated`]. Any error ends the attempt.
pub trait ReaderAuthenticator: Send + fmt::Debug {
    /// The scheme implemented
    fn scheme(&self) -> Scheme;

    /// Produce the next command of the exchange
    fn next_command(&mut self, ctx: &mut ProtocolContext) -> Result<Command>;

    /// Consume the reply to the last command
    fn handle_response(&mut self, ctx: &mut ProtocolContext, response: &Response) -> Result<()>;

    /// The clear request that reads the credential's object once authenticated
    fn read_object_command(&self) -> Command;

    /// Extract the object from the clear reply to [`read_object_command`](Self::read_object_command)
    fn extract_object(&self, response: &Response) -> Result<Bytes>;
}

/// Credential half of a scheme
pub trait CredentialAuthenticator: Send + fmt::Debug {
    /// The scheme implemented
    fn scheme(&self) -> Scheme;

    /// Answer `SELECT` by application identifier
    fn select_application(&mut self, ctx: &mut ProtocolContext, command: &Command)
    -> Result<Response>;

    /// Answer the badge-specific application file selection
    fn select_adf(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response> {
        let _ = (ctx, command);
        Ok(Response::status_only(
            nexum_apdu_core::StatusWord::INS_NOT_SUPPORTED,
        ))
    }

    /// Answer the challenge request
    fn challenge(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response>;

    /// Verify the reader cryptogram and answer with the card cryptogram
    fn authenticate(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response>;

    /// Answer a clear request that arrived through the secure channel
    fn serve(&mut self, request: &Command) -> Response;
}

impl<T: ReaderAuthenticator + ?Sized> ReaderAuthenticator for Box<T> {
    fn scheme(&self) -> Scheme {
        (**self).scheme()
    }

    fn next_command(&mut self, ctx: &mut ProtocolContext) -> Result<Command> {
        (**self).next_command(ctx)
    }

    fn handle_response(&mut self, ctx: &mut ProtocolContext, response: &Response) -> Result<()> {
        (**self).handle_response(ctx, response)
    }

    fn read_object_command(&self) -> Command {
        (**self).read_object_command()
    }

    fn extract_object(&self, response: &Response) -> Result<Bytes> {
        (**self).extract_object(response)
    }
}

impl<T: CredentialAuthenticator + ?Sized> CredentialAuthenticator for Box<T> {
    fn scheme(&self) -> Scheme {
        (**self).scheme()
    }

    fn select_application(
        &mut self,
        ctx: &mut ProtocolContext,
        command: &Command,
    ) -> Result<Response> {
        (**self).select_application(ctx, command)
    }

    fn select_adf(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response> {
        (**self).select_adf(ctx, command)
    }

    fn challenge(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response> {
        (**self).challenge(ctx, command)
    }

    fn authenticate(&mut self, ctx: &mut ProtocolContext, command: &Command) -> Result<Response> {
        (**self).authenticate(ctx, command)
    }

    fn serve(&mut self, request: &Command) -> Response {
        (**self).serve(request)
    }
}

/// Payload of a successful reply, or the failing status as an error
pub(crate) fn success_payload(response: &Response) -> Result<&[u8]> {
    if !response.is_success() {
        return Err(Error::Status(response.status()));
    }
    Ok(response.payload())
}

/// A fixed value when configured, fresh random bytes otherwise
pub(crate) fn fixed_or_random<const N: usize>(fixed: Option<[u8; N]>) -> [u8; N] {
    fixed.unwrap_or_else(random_bytes::<N>)
}

/// MAC over a cryptogram body
fn cryptogram_mac(
    algorithm: MacAlgorithm,
    suite: CipherSuite,
    key: &Key128,
    ciphertext: &[u8],
) -> Result<[u8; MAC_LEN]> {
    match algorithm {
        MacAlgorithm::RetailMac => retail_mac(key, &iso_pad(ciphertext, 8)),
        MacAlgorithm::Cmac => cmac(suite, key, ciphertext),
    }
}

/// Encrypt `clear` and append its MAC
pub(crate) fn seal_cryptogram(
    algorithm: MacAlgorithm,
    suite: CipherSuite,
    enc_key: &Key128,
    mac_key: &Key128,
    clear: &[u8],
) -> Result<Vec<u8>> {
    let mut cryptogram = encrypt_zero_iv(suite, enc_key, clear)?;
    let mac = cryptogram_mac(algorithm, suite, mac_key, &cryptogram)?;
    cryptogram.extend_from_slice(&mac);
    Ok(cryptogram)
}

/// Verify the MAC of a cryptogram and only then decrypt it
pub(crate) fn open_cryptogram(
    algorithm: MacAlgorithm,
    suite: CipherSuite,
    enc_key: &Key128,
    mac_key: &Key128,
    cryptogram: &[u8],
    clear_len: usize,
) -> Result<Vec<u8>> {
    if cryptogram.len() != clear_len + MAC_LEN {
        return Err(Error::Protocol("cryptogram has the wrong length"));
    }
    let (ciphertext, mac) = cryptogram.split_at(clear_len);
    let expected = cryptogram_mac(algorithm, suite, mac_key, ciphertext)?;
    if !mac_matches(&expected, mac) {
        return Err(Error::Integrity("authentication cryptogram MAC"));
    }
    decrypt_zero_iv(suite, enc_key, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_bac_cryptogram_known_answer() {
        let k_enc = Key128::new(hex!("AB94FDECF2674FDFB9B391F85D7F76F2"));
        let k_mac = Key128::new(hex!("7962D9ECE03D1ACD4C76089DCE131543"));
        let clear = hex!("781723860C06C2264608F919887022120B795240CB7049B01C19B33E32804F0B");

        let sealed = seal_cryptogram(
            MacAlgorithm::RetailMac,
            CipherSuite::TwoKeyTripleDes,
            &k_enc,
            &k_mac,
            &clear,
        )
        .unwrap();
        assert_eq!(
            sealed,
            hex!(
                "72C29C2371CC9BDB65B779B8E8D37B29ECC154AA56A8799FAE2F498F76ED92F2"
                "5F1448EEA8AD90A7"
            )
        );

        let opened = open_cryptogram(
            MacAlgorithm::RetailMac,
            CipherSuite::TwoKeyTripleDes,
            &k_enc,
            &k_mac,
            &sealed,
            32,
        )
        .unwrap();
        assert_eq!(opened, clear);
    }

    #[test]
    fn test_tampered_cryptogram_is_not_decrypted() {
        let key = Key128::new([0x42; 16]);
        let mut sealed =
            seal_cryptogram(MacAlgorithm::Cmac, CipherSuite::Aes128, &key, &key, &[0x11; 32])
                .unwrap();
        sealed[3] ^= 0x01;
        assert!(matches!(
            open_cryptogram(MacAlgorithm::Cmac, CipherSuite::Aes128, &key, &key, &sealed, 32),
            Err(Error::Integrity(_))
        ));
        assert!(matches!(
            open_cryptogram(MacAlgorithm::Cmac, CipherSuite::Aes128, &key, &key, &sealed[..39], 32),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_auth_parameters_wipe() {
        let mut params = AuthParameters::new(CipherSuite::Aes128, HashAlgorithm::Sha1, 1);
        params.card_random = [0xAA; 8];
        params.set_static_keys(Key128::new([1; 16]), Key128::new([2; 16]));
        assert!(params.static_keys().is_ok());

        params.zeroize();
        assert_eq!(params.card_random, [0; 8]);
        assert!(params.static_keys().is_err());
        assert_eq!(format!("{params:?}"), "AuthParameters { suite: Aes128, hash: Sha1, key_no: 0, .. }");
    }

    #[test]
    fn test_scheme_names() {
        assert_eq!(Scheme::Bac.to_string(), "bac");
        assert_eq!(Scheme::Badge.to_string(), "badge");
        assert!(AuthState::Failed.is_terminal());
        assert!(!AuthState::Challenge2.is_terminal());
    }
}
