//! Transport traits for APDU communication with credentials
//!
//! A transport moves one serialized command to the credential and returns the one
//! serialized response. How the bytes are framed on the physical link (a single radio
//! block, a train of notification fragments) is the transport's business only.

pub mod error;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

use crate::{Command, Response};

/// Trait for basic card transports
///
/// A transport is responsible for sending and receiving raw APDU bytes.
/// It has no knowledge of command structure, secure channels, or protocol details,
/// and it never retries: a failure is handed to the caller as-is.
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw APDU bytes to the credential and return response bytes
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = %hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = %e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// Check if the transport is connected to a credential
    fn is_connected(&self) -> bool;

    /// Reset the transport connection
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Serialize a command, exchange it and parse the response
    fn transmit(&mut self, command: &Command) -> crate::Result<Response> {
        let raw = self.transmit_raw(&command.try_to_bytes()?)?;
        Response::from_bytes(&raw)
    }
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).do_transmit_raw(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    struct ScriptedTransport {
        responses: VecDeque<Bytes>,
        commands: Vec<Bytes>,
    }

    impl CardTransport for ScriptedTransport {
        fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
            self.commands.push(Bytes::copy_from_slice(command));
            self.responses.pop_front().ok_or(TransportError::Transmission)
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn reset(&mut self) -> Result<(), TransportError> {
            self.commands.clear();
            Ok(())
        }
    }

    #[test]
    fn test_transmit_parses_response() {
        let mut transport = ScriptedTransport {
            responses: VecDeque::from([Bytes::from_static(&hex!("4608F919887022129000"))]),
            ..Default::default()
        };

        let resp = transport
            .transmit(&Command::new(0x00, 0x84, 0x00, 0x00).with_le(0x08))
            .unwrap();
        assert_eq!(resp.payload(), &hex!("4608F91988702212"));
        assert_eq!(transport.commands[0].as_ref(), &hex!("0084000008"));
    }

    #[test]
    fn test_transport_error_is_not_retried() {
        let mut transport = Box::new(ScriptedTransport::default());
        let err = transport
            .transmit(&Command::new(0x00, 0x84, 0x00, 0x00).with_le(0x08))
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(transport.commands.len(), 1);
    }
}
