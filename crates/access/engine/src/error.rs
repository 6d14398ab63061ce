//! Error types for credential authentication and secure messaging

use derive_more::Display;
use nexum_apdu_core::{StatusWord, TransportError};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure, as reported to collaborators
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The link failed; the attempt is over
    #[display("transport")]
    Transport,
    /// A message was malformed or arrived out of order
    #[display("protocol")]
    Protocol,
    /// A MAC or cryptogram did not verify
    #[display("integrity")]
    Integrity,
    /// A cipher, hash or derivation selector is not supported
    #[display("unsupported algorithm")]
    UnsupportedAlgorithm,
}

/// Errors raised by the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Link failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// APDU framing failure
    #[error(transparent)]
    Apdu(#[from] nexum_apdu_core::Error),

    /// Malformed or unexpected message
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// The peer answered with a failure status
    #[error("Unexpected status: {0}")]
    Status(StatusWord),

    /// MAC or cryptogram mismatch
    #[error("Integrity check failed: {0}")]
    Integrity(&'static str),

    /// Echoed value in a cryptogram did not match
    #[error("Cryptogram echo mismatch: {0}")]
    EchoMismatch(&'static str),

    /// Unknown cipher or hash selector
    #[error("Unsupported algorithm selector: {0:#04x}")]
    UnsupportedAlgorithm(u8),

    /// The send sequence counter cannot advance without repeating a value
    #[error("Send sequence counter exhausted, re-authentication required")]
    CounterExhausted,

    /// A secure channel was used before authentication succeeded
    #[error("Secure channel not established")]
    NotAuthenticated,

    /// Cryptographic primitive misuse (key or block length)
    #[error("Cryptographic error: {0}")]
    Crypto(&'static str),

    /// TLV encoding failure
    #[error("TLV error: {0}")]
    Tlv(String),

    /// Invalid credential or engine configuration
    #[error("Invalid configuration: {0}")]
    Config(&'static str),
}

impl Error {
    /// Map the error onto the reporting taxonomy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Apdu(e) if e.is_transport() => ErrorKind::Transport,
            Self::Integrity(_) | Self::EchoMismatch(_) => ErrorKind::Integrity,
            Self::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Self::Apdu(_)
            | Self::Protocol(_)
            | Self::Status(_)
            | Self::CounterExhausted
            | Self::NotAuthenticated
            | Self::Crypto(_)
            | Self::Tlv(_)
            | Self::Config(_) => ErrorKind::Protocol,
        }
    }
}

impl From<iso7816_tlv::TlvError> for Error {
    fn from(error: iso7816_tlv::TlvError) -> Self {
        Self::Tlv(error.to_string())
    }
}
