//! Fragmenting transport for notification-driven links
//!
//! Outbound messages are split into flagged packets and handed to a [`FragmentSink`].
//! Inbound packets arrive from a link callback through a [`FragmentConsumer`] and are
//! reassembled until a complete reply is available or the reply timeout expires.

use std::{
    fmt,
    time::{Duration, Instant},
};

use bytes::Bytes;
use nexum_apdu_core::{CardTransport, TransportError};
use tracing::{debug, trace, warn};

use crate::{
    config::LinkConfig,
    fragment::{Delivery, ReassemblyBuffer, fragment},
    queue::{FragmentConsumer, FragmentProducer, PushOutcome},
};

/// A link that transmits one packet at a time
pub trait FragmentSink: Send + fmt::Debug {
    /// Transmit one flagged packet
    fn send_fragment(&mut self, packet: &[u8]) -> Result<(), TransportError>;
}

impl FragmentSink for FragmentProducer {
    fn send_fragment(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        match self.push(packet)? {
            PushOutcome::Queued => Ok(()),
            PushOutcome::Dropped => Err(TransportError::Transmission),
        }
    }
}

/// Splits messages into packets for a [`FragmentSink`]
#[derive(Debug)]
pub struct FragmentWriter<S> {
    sink: S,
    mtu: usize,
}

impl<S: FragmentSink> FragmentWriter<S> {
    /// Create a writer using the MTU from `config`
    pub const fn new(sink: S, config: &LinkConfig) -> Self {
        Self {
            sink,
            mtu: config.mtu,
        }
    }

    /// Fragment and transmit one message
    pub fn write(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let packets = fragment(message, self.mtu)?;
        trace!(
            length = message.len(),
            packets = packets.len(),
            "Writing fragmented message"
        );
        for packet in &packets {
            self.sink.send_fragment(packet)?;
        }
        Ok(())
    }

    /// Borrow the sink
    pub const fn sink(&self) -> &S {
        &self.sink
    }
}

/// [`CardTransport`] over a fragmenting link
///
/// Each exchange writes the command as a train of packets, then blocks on the inbound
/// queue until the reply is reassembled.
pub struct FragmentingTransport<S> {
    writer: FragmentWriter<S>,
    inbound: FragmentConsumer,
    reassembly: ReassemblyBuffer,
    reply_timeout: Duration,
    closed: bool,
}

impl<S: FragmentSink> fmt::Debug for FragmentingTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentingTransport")
            .field("writer", &self.writer)
            .field("reassembly_in_progress", &self.reassembly.in_progress())
            .field("reply_timeout", &self.reply_timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<S: FragmentSink> FragmentingTransport<S> {
    /// Create a transport writing to `sink` and reading from `inbound`
    pub fn new(sink: S, inbound: FragmentConsumer, config: &LinkConfig) -> Self {
        Self {
            writer: FragmentWriter::new(sink, config),
            inbound,
            reassembly: ReassemblyBuffer::new(),
            reply_timeout: config.reply_timeout,
            closed: false,
        }
    }

    fn await_reply(&mut self) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + self.reply_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let packet = self.inbound.recv_timeout(remaining)?;
            match self.reassembly.accept(&packet) {
                Delivery::Complete(message) => return Ok(message),
                Delivery::Pending => {}
                Delivery::Aborted => warn!("Reply aborted by link, still waiting"),
                Delivery::Dropped => {}
            }
        }
    }
}

impl<S: FragmentSink> CardTransport for FragmentingTransport<S> {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let result = self.writer.write(command).and_then(|()| self.await_reply());
        if matches!(result, Err(TransportError::Closed)) {
            self.closed = true;
        }
        result
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.reassembly.reset();
        let discarded = self.inbound.drain();
        debug!(discarded, "Reset fragmenting transport");
        Ok(())
    }
}
