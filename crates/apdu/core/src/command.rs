//! APDU command framing
//!
//! Short-length ISO/IEC 7816-4 commands: a 4-byte header, an optional payload
//! introduced by a 1-byte Lc, and an optional 1-byte Le.

use bytes::{BufMut, Bytes, BytesMut};
use derive_more::Display;

use crate::{Error, Result};

/// Largest payload a short Lc byte can describe
pub const MAX_SHORT_DATA: usize = 255;

/// The four header bytes of a command
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("{cla:02X} {ins:02X} {p1:02X} {p2:02X}")]
pub struct Header {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
}

impl Header {
    /// Create a header from its four bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    /// Serialize the header
    pub const fn to_bytes(self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    /// Same header with the given class byte
    pub const fn with_class(mut self, cla: u8) -> Self {
        self.cla = cla;
        self
    }
}

impl From<[u8; 4]> for Header {
    fn from(bytes: [u8; 4]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<u8>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a command from a header
    pub const fn from_header(header: Header) -> Self {
        Self::new(header.cla, header.ins, header.p1, header.p2)
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// The command header
    pub const fn header(&self) -> Header {
        Header::new(self.cla, self.ins, self.p1, self.p2)
    }

    /// Command payload, if any
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Calculate length of the serialized command
    pub fn command_length(&self) -> usize {
        4 + self.data().map_or(0, |d| 1 + d.len()) + usize::from(self.le.is_some())
    }

    /// Serialize the command, rejecting payloads a short Lc cannot describe
    pub fn try_to_bytes(&self) -> Result<Bytes> {
        if let Some(data) = self.data() {
            if data.len() > MAX_SHORT_DATA {
                return Err(Error::DataTooLong(data.len()));
            }
        }
        Ok(self.to_bytes())
    }

    /// Convert to raw APDU bytes
    ///
    /// The payload must fit in a short Lc byte; debug builds panic otherwise. Use
    /// [`Command::try_to_bytes`] when the payload size is not already bounded.
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());
        buffer.put_slice(&self.header().to_bytes());

        if let Some(data) = self.data() {
            debug_assert!(
                data.len() <= MAX_SHORT_DATA,
                "payload of {} bytes does not fit a short APDU",
                data.len()
            );
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Parse a command from raw bytes
    ///
    /// A single byte after the header is read as Le; otherwise the fifth byte is Lc and
    /// may be followed by exactly one Le byte.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let Some((header, body)) = data.split_first_chunk::<4>() else {
            return Err(Error::InvalidCommandLength(data.len()));
        };
        let mut command = Self::from_header(Header::from(*header));

        match body {
            [] => {}
            [le] => command.le = Some(*le),
            [lc, rest @ ..] => {
                let lc = usize::from(*lc);
                match rest.len().checked_sub(lc) {
                    Some(0) => {}
                    Some(1) => command.le = Some(rest[lc]),
                    _ => return Err(Error::InvalidCommandLength(data.len())),
                }
                if lc > 0 {
                    command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                }
            }
        }

        Ok(command)
    }
}

impl From<Header> for Command {
    fn from(header: Header) -> Self {
        Self::from_header(header)
    }
}
