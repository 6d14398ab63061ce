//! Role drivers
//!
//! A [`ReaderDriver`] runs one authentication attempt to completion over any
//! [`CardTransport`](nexum_apdu_core::CardTransport): it sends each command, blocks for the
//! reply, and after authentication issues exactly one protected read of the credential's
//! object. A [`CredentialDriver`] reacts to requests as they arrive, routing each one
//! through a static pattern table to the scheme's [`CredentialAuthenticator`].
//!
//! [`CredentialAuthenticator`]: crate::auth::CredentialAuthenticator

mod credential;
mod reader;

pub use credential::{CredentialDriver, CredentialRequest, RequestPattern};
pub use reader::ReaderDriver;
