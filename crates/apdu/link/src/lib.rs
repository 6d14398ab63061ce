//! Wireless link transports for APDU operations
//!
//! This crate provides two implementations of the `CardTransport` trait from
//! `nexum-apdu-core`, one per link shape:
//!
//! - [`BlockTransport`]: the radio exchanges whole frames, so one write yields exactly one
//!   read. Used for direct contactless polling.
//! - [`FragmentingTransport`]: the link carries small notification packets, each prefixed
//!   with a flag byte. Outbound messages are split with [`fragment`], inbound packets are
//!   delivered asynchronously by a callback into a bounded [`FragmentQueue`] and
//!   reassembled by a [`ReassemblyBuffer`].
//!
//! Neither adapter retries: a link failure is reported to the caller, which owns the
//! attempt.
//!
//! # Examples
//!
//! ```
//! use nexum_apdu_transport_link::{Delivery, ReassemblyBuffer, fragment};
//!
//! let packets = fragment(&[0x00, 0x84, 0x00, 0x00, 0x08], 3).unwrap();
//! let mut buffer = ReassemblyBuffer::new();
//! let mut delivered = None;
//! for packet in &packets {
//!     if let Delivery::Complete(message) = buffer.accept(packet) {
//!         delivered = Some(message);
//!     }
//! }
//! assert_eq!(delivered.unwrap().as_ref(), &[0x00, 0x84, 0x00, 0x00, 0x08]);
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod config;
mod fragment;
mod fragmenting;
mod queue;

pub use block::{BlockLink, BlockTransport};
pub use config::{LinkConfig, OverflowPolicy};
pub use fragment::{Delivery, FragmentFlags, ReassemblyBuffer, fragment};
pub use fragmenting::{FragmentSink, FragmentWriter, FragmentingTransport};
pub use queue::{FragmentConsumer, FragmentProducer, FragmentQueue, PushOutcome};
