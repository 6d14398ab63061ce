//! Mutual authentication and secure messaging for contactless access credentials
//!
//! The engine plays either side of a contactless exchange:
//!
//! - As a **reader** it selects the credential, runs a challenge/response mutual
//!   authentication, derives session keys and reads one protected object
//!   ([`ReaderDriver`]).
//! - As a **credential** it answers those requests, routing each incoming command through a
//!   static pattern table ([`CredentialDriver`]), optionally on its own worker thread fed by a
//!   fragment queue ([`CredentialListener`]).
//!
//! Two schemes are supported: ICAO 9303 Basic Access Control ([`auth::bac`]) and a
//! diversified-key access badge ([`auth::badge`]). Once authenticated, every exchange goes
//! through a [`SecureChannel`] that encrypts payloads, MACs header and body under a send
//! sequence counter, and refuses to hand out anything that fails verification.
//!
//! # Examples
//!
//! ```
//! use nexum_access::auth::bac::{MrzInfo, check_digit};
//!
//! assert_eq!(check_digit("690806"), 1);
//! let mrz = MrzInfo::new("L898902C", "690806", "940623").unwrap();
//! assert_eq!(mrz.key_seed_material(), "L898902C<369080619406236");
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod events;
pub mod kdf;
pub mod listener;
pub mod secure_channel;

mod context;
mod error;
mod tlv;

pub use auth::{AuthParameters, AuthState, CredentialAuthenticator, ReaderAuthenticator, Scheme};
pub use config::AccessConfig;
pub use context::{ProtocolContext, Role};
pub use driver::{CredentialDriver, ReaderDriver};
pub use error::{Error, ErrorKind, Result};
pub use events::{Event, EventReceiver, EventSender, SessionEvent, event_channel};
pub use listener::{CredentialListener, DirectLink};
pub use secure_channel::{EnvelopeFormat, SecureChannel, SendSequenceCounter};
