//! Error type for APDU framing and transport operations

use crate::response::status::StatusWord;
use crate::transport::TransportError;

/// Result type for APDU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while framing, parsing or exchanging APDUs
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The link to the credential failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A command did not have a valid short-length layout
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// A command payload does not fit a short Lc byte
    #[error("Command data too long: {0} bytes (max 255)")]
    DataTooLong(usize),

    /// A response was shorter than its status word
    #[error("Incomplete response: {0} bytes")]
    IncompleteResponse(usize),

    /// Unexpected status word from the credential
    #[error("Card returned error status: {0}")]
    Status(StatusWord),

    /// Malformed content
    #[error("Parse error: {0}")]
    Parse(&'static str),
}

impl Error {
    /// Create a new parse error
    pub const fn parse(message: &'static str) -> Self {
        Self::Parse(message)
    }

    /// Check whether this error originated in the transport layer
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
