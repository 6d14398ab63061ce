//! Fragment framing for notification-driven links
//!
//! Every packet starts with one flag byte. A message is carried by a train of packets:
//! the first has [`FragmentFlags::START`], the last has [`FragmentFlags::END`], and a
//! message that fits one packet carries both (`0xC0`). A packet with the error bit set
//! aborts whatever is being reassembled.

use bytes::{BufMut, Bytes, BytesMut};
use nexum_apdu_core::TransportError;
use tracing::{trace, warn};

/// Flag byte leading every fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentFlags(u8);

impl FragmentFlags {
    /// First packet of a message
    pub const START: u8 = 0x80;
    /// Last packet of a message
    pub const END: u8 = 0x40;
    /// Link-level error indication
    pub const ERROR: u8 = 0x01;
    /// A message carried by one packet
    pub const SINGLE: u8 = Self::START | Self::END;

    /// Wrap a raw flag byte
    pub const fn new(flags: u8) -> Self {
        Self(flags)
    }

    /// Raw flag byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Packet opens a new message
    pub const fn is_start(self) -> bool {
        self.0 & Self::START != 0
    }

    /// Packet closes the current message
    pub const fn is_end(self) -> bool {
        self.0 & Self::END != 0
    }

    /// Packet signals a link error
    pub const fn is_error(self) -> bool {
        self.0 & Self::ERROR != 0
    }
}

/// Split a message into flagged packets of at most `mtu` bytes
///
/// Each packet carries `mtu - 1` payload bytes after its flag byte. An empty message is
/// sent as a single flag-only packet.
pub fn fragment(payload: &[u8], mtu: usize) -> Result<Vec<Bytes>, TransportError> {
    if mtu < 2 {
        return Err(TransportError::other(format!(
            "MTU {mtu} cannot carry a flag byte and payload"
        )));
    }

    let chunk_size = mtu - 1;
    if payload.is_empty() {
        return Ok(vec![Bytes::from_static(&[FragmentFlags::SINGLE])]);
    }

    let count = payload.len().div_ceil(chunk_size);
    let packets = payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| {
            let mut flags = 0;
            if index == 0 {
                flags |= FragmentFlags::START;
            }
            if index + 1 == count {
                flags |= FragmentFlags::END;
            }
            let mut packet = BytesMut::with_capacity(chunk.len() + 1);
            packet.put_u8(flags);
            packet.put_slice(chunk);
            packet.freeze()
        })
        .collect();

    Ok(packets)
}

/// Outcome of feeding one packet to a [`ReassemblyBuffer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// More packets are needed
    Pending,
    /// A full message was reassembled
    Complete(Bytes),
    /// The packet carried the error flag; any partial message was discarded
    Aborted,
    /// The packet was not part of any message and was ignored
    Dropped,
}

/// Reassembles messages from flagged packets
///
/// State lives entirely in the buffer, so packets may be fed from any context that owns it.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    buffer: BytesMut,
    in_progress: bool,
}

impl ReassemblyBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a message is partially received
    pub const fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Discard any partial message
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_progress = false;
    }

    /// Feed one packet
    pub fn accept(&mut self, packet: &[u8]) -> Delivery {
        let Some((&flags, body)) = packet.split_first() else {
            warn!("Dropping empty fragment");
            return Delivery::Dropped;
        };
        let flags = FragmentFlags::new(flags);

        if flags.is_error() {
            warn!(
                flags = flags.bits(),
                partial = self.buffer.len(),
                "Link error flag, aborting reassembly"
            );
            self.reset();
            return Delivery::Aborted;
        }

        if flags.is_start() {
            if self.in_progress {
                warn!(
                    discarded = self.buffer.len(),
                    "New message started before previous one ended"
                );
            }
            self.buffer.clear();
            self.in_progress = true;
        } else if !self.in_progress {
            warn!(flags = flags.bits(), "Dropping continuation without start");
            return Delivery::Dropped;
        }

        self.buffer.put_slice(body);
        trace!(
            flags = flags.bits(),
            length = body.len(),
            total = self.buffer.len(),
            "Fragment appended"
        );

        if flags.is_end() {
            self.in_progress = false;
            return Delivery::Complete(self.buffer.split().freeze());
        }

        Delivery::Pending
    }
}
