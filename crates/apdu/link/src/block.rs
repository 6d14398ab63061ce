//! Block-exchange transport
//!
//! The radio carries whole frames: one write is answered by exactly one read.

use std::{fmt, time::Duration};

use bytes::Bytes;
use nexum_apdu_core::{CardTransport, TransportError};
use tracing::debug;

use crate::config::LinkConfig;

/// A physical link that exchanges whole blocks
pub trait BlockLink: Send + fmt::Debug {
    /// Send one block to the peer
    fn send_block(&mut self, block: &[u8]) -> Result<(), TransportError>;

    /// Receive the peer's answer to the last block
    fn receive_block(&mut self, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Whether a peer is in the field
    fn is_present(&self) -> bool {
        true
    }
}

/// [`CardTransport`] over a [`BlockLink`]
pub struct BlockTransport<L> {
    link: L,
    reply_timeout: Duration,
}

impl<L: BlockLink> fmt::Debug for BlockTransport<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockTransport")
            .field("link", &self.link)
            .field("reply_timeout", &self.reply_timeout)
            .finish()
    }
}

impl<L: BlockLink> BlockTransport<L> {
    /// Create a transport over `link`
    pub const fn new(link: L, config: &LinkConfig) -> Self {
        Self {
            link,
            reply_timeout: config.reply_timeout,
        }
    }

    /// Borrow the underlying link
    pub const fn link(&self) -> &L {
        &self.link
    }

    /// Consume the transport and return the link
    pub fn into_link(self) -> L {
        self.link
    }
}

impl<L: BlockLink> CardTransport for BlockTransport<L> {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.link.send_block(command)?;
        self.link.receive_block(self.reply_timeout)
    }

    fn is_connected(&self) -> bool {
        self.link.is_present()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        debug!("Resetting block transport");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use nexum_apdu_core::Command;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    struct ScriptedLink {
        sent: Vec<Bytes>,
        replies: VecDeque<Result<Bytes, TransportError>>,
    }

    impl BlockLink for ScriptedLink {
        fn send_block(&mut self, block: &[u8]) -> Result<(), TransportError> {
            self.sent.push(Bytes::copy_from_slice(block));
            Ok(())
        }

        fn receive_block(&mut self, _timeout: Duration) -> Result<Bytes, TransportError> {
            self.replies.pop_front().unwrap_or(Err(TransportError::Timeout))
        }
    }

    #[test]
    fn test_one_write_one_read() {
        let link = ScriptedLink {
            replies: VecDeque::from([Ok(Bytes::from_static(&hex!("4608F919887022129000")))]),
            ..Default::default()
        };
        let mut transport = BlockTransport::new(link, &LinkConfig::default());

        let response = transport
            .transmit(&Command::new(0x00, 0x84, 0x00, 0x00).with_le(0x08))
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.payload(), &hex!("4608F91988702212"));
        assert_eq!(transport.link().sent.len(), 1);
        assert_eq!(transport.link().sent[0].as_ref(), &hex!("0084000008"));
    }

    #[test]
    fn test_link_error_is_not_retried() {
        let link = ScriptedLink {
            replies: VecDeque::from([
                Err(TransportError::Device),
                Ok(Bytes::from_static(&hex!("9000"))),
            ]),
            ..Default::default()
        };
        let mut transport = BlockTransport::new(link, &LinkConfig::default());

        let err = transport.transmit_raw(&hex!("0084000008")).unwrap_err();
        assert_eq!(err, TransportError::Device);
        let link = transport.into_link();
        assert_eq!(link.sent.len(), 1);
        assert_eq!(link.replies.len(), 1);
    }
}
