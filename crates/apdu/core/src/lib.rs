//! Core types for APDU (Application Protocol Data Unit) framing
//!
//! This crate provides the foundational types shared by the contactless credential
//! engine and its transports, following ISO/IEC 7816-4 short-length framing.
//!
//! ## Overview
//!
//! - [`Command`]: a 4-byte header with optional payload and expected length
//! - [`Response`] and [`StatusWord`]: a response payload followed by SW1-SW2
//! - [`CardTransport`]: a byte-level exchange with a credential, one command in, one
//!   response out, regardless of how the physical link frames the bytes
//! - [`Error`] and [`TransportError`]: the failures a transport or a framing parser can
//!   raise
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod response;
pub mod transport;

mod error;
pub use error::{Error, Result};

pub use command::{Command, Header};
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, Command, Error, Header, Response, Result, StatusWord,
        transport::{CardTransport, TransportError},
    };
}
