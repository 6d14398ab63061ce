use std::fmt;

use bytes::Bytes;
use nexum_apdu_core::{CardTransport, Command, Response};
use tracing::{debug, info, warn};

use crate::{
    Error, ErrorKind, ProtocolContext, Result,
    auth::{ReaderAuthenticator, Scheme},
    context::Role,
    events::{Event, EventSender},
};

/// Upper bound on authentication round trips; every scheme needs at most four
const MAX_AUTH_STEPS: usize = 8;

/// Drives the reader side of one session
///
/// The driver owns its transport and context. [`run`](Self::run) performs a single attempt:
/// a transport error, a failed verification or a malformed reply ends it with exactly one
/// [`Event::Error`]; a successful read ends it with [`Event::Success`].
pub struct ReaderDriver<T> {
    transport: T,
    authenticator: Box<dyn ReaderAuthenticator>,
    ctx: ProtocolContext,
    events: EventSender,
}

impl<T: CardTransport> fmt::Debug for ReaderDriver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderDriver")
            .field("transport", &self.transport)
            .field("scheme", &self.authenticator.scheme())
            .field("state", &self.ctx.state())
            .finish()
    }
}

impl<T: CardTransport> ReaderDriver<T> {
    /// Create a driver for `authenticator` over `transport`
    pub fn new(transport: T, authenticator: impl ReaderAuthenticator + 'static) -> Self {
        Self {
            transport,
            authenticator: Box::new(authenticator),
            ctx: ProtocolContext::new(Role::Reader),
            events: EventSender::disabled(),
        }
    }

    /// Report session events to `events`
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// The session context
    pub const fn context(&self) -> &ProtocolContext {
        &self.ctx
    }

    /// Borrow the transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Authenticate and read the credential's object
    ///
    /// The transport is reset first, so a late reply to an abandoned exchange is never taken
    /// as the answer to this session's first command. On success the session is torn down
    /// before the object is returned. On failure the context is left in
    /// [`AuthState::Failed`](crate::AuthState::Failed) with all key material released.
    pub fn run(&mut self) -> Result<Bytes> {
        let scheme = self.authenticator.scheme();
        info!(%scheme, "Starting reader session");

        match self.attempt(scheme) {
            Ok(object) => {
                self.emit(Event::Success);
                self.ctx.teardown();
                info!(%scheme, length = object.len(), "Credential object read");
                Ok(object)
            }
            Err(error) => {
                warn!(%scheme, %error, "Reader session failed");
                self.ctx.fail();
                if error.kind() == ErrorKind::Transport
                    && let Err(reset) = self.transport.reset()
                {
                    debug!(error = %reset, "Transport reset failed");
                }
                self.emit(Event::Error(error.kind()));
                Err(error)
            }
        }
    }

    fn attempt(&mut self, scheme: Scheme) -> Result<Bytes> {
        self.transport.reset()?;
        let mut detected = false;
        for _ in 0..MAX_AUTH_STEPS {
            let command = self.authenticator.next_command(&mut self.ctx)?;
            let response = self.exchange(&command)?;
            if !detected {
                detected = true;
                self.emit(Event::Detected);
            }
            self.authenticator.handle_response(&mut self.ctx, &response)?;

            if self.ctx.is_authenticated() {
                debug!(%scheme, "Reader authenticated");
                self.emit(Event::Authenticated);
                return self.read_object();
            }
        }
        Err(Error::Protocol("authentication did not conclude"))
    }

    fn read_object(&mut self) -> Result<Bytes> {
        let request = self.authenticator.read_object_command();
        let protected = self.ctx.wrap_command(&request)?;
        self.emit(Event::ObjectRequested);

        let reply = self.exchange(&protected)?;
        let clear = self.ctx.unwrap_response(&reply)?;
        self.authenticator.extract_object(&clear)
    }

    fn exchange(&mut self, command: &Command) -> Result<Response> {
        Ok(self.transport.transmit(command)?)
    }

    fn emit(&self, event: Event) {
        self.events
            .emit(self.authenticator.scheme(), Role::Reader, event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use hex_literal::hex;
    use nexum_apdu_core::TransportError;

    use super::*;
    use crate::{
        auth::{AuthState, bac::{BacReader, MrzInfo}},
        events::event_channel,
    };

    #[derive(Debug, Default)]
    struct ScriptedTransport {
        sent: Vec<Bytes>,
        replies: VecDeque<Bytes>,
        resets: usize,
    }

    impl ScriptedTransport {
        fn with_replies(replies: &[&[u8]]) -> Self {
            Self {
                replies: replies.iter().map(|r| Bytes::copy_from_slice(r)).collect(),
                ..Default::default()
            }
        }
    }

    impl CardTransport for ScriptedTransport {
        fn do_transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError> {
            self.sent.push(Bytes::copy_from_slice(command));
            self.replies.pop_front().ok_or(TransportError::Timeout)
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn reset(&mut self) -> std::result::Result<(), TransportError> {
            self.resets += 1;
            Ok(())
        }
    }

    fn icao_reader() -> BacReader {
        BacReader::from_mrz(&MrzInfo::new("L898902C", "690806", "940623").unwrap())
            .unwrap()
            .with_reader_randoms(
                hex!("781723860C06C226"),
                hex!("0B795240CB7049B01C19B33E32804F0B"),
            )
    }

    #[test]
    fn test_forged_card_cryptogram_fails_session() {
        let mut forged = hex!(
            "46B9342A41396CD7386BF5803104D7CEDC122B9132139BAF2EEDC94EE178534F"
            "2F2D235D074D7449"
        );
        forged[5] ^= 0x20;
        let mut reply = forged.to_vec();
        reply.extend_from_slice(&[0x90, 0x00]);

        let transport = ScriptedTransport::with_replies(&[
            &hex!("9000"),
            &hex!("4608F919887022129000"),
            &reply,
        ]);
        let (sender, receiver) = event_channel();
        let mut driver = ReaderDriver::new(transport, icao_reader()).with_events(sender);

        let error = driver.run().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Integrity);
        assert_eq!(driver.context().state(), AuthState::Failed);
        assert!(driver.context().channel().is_none());

        let events: Vec<_> = receiver.try_iter().map(|e| e.event).collect();
        assert_eq!(events, vec![Event::Detected, Event::Error(ErrorKind::Integrity)]);

        // Nothing was sent after the card cryptogram failed to verify.
        assert_eq!(driver.transport().sent.len(), 3);
        assert_eq!(driver.transport().resets, 1);
        assert!(matches!(
            driver.ctx.wrap_command(&Command::new(0x00, 0xB0, 0x81, 0x00)),
            Err(Error::NotAuthenticated)
        ));
    }

    #[test]
    fn test_timeout_is_fatal() {
        let (sender, receiver) = event_channel();
        let mut driver =
            ReaderDriver::new(ScriptedTransport::default(), icao_reader()).with_events(sender);

        let error = driver.run().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transport);
        let events: Vec<_> = receiver.try_iter().map(|e| e.event).collect();
        assert_eq!(events, vec![Event::Error(ErrorKind::Transport)]);

        // Reset before the attempt and again to discard whatever the timed out exchange left.
        assert_eq!(driver.transport().resets, 2);
    }

    #[test]
    fn test_rejected_challenge_surfaces_status() {
        let transport = ScriptedTransport::with_replies(&[&hex!("9000"), &hex!("6985")]);
        let mut driver = ReaderDriver::new(transport, icao_reader());
        assert!(matches!(driver.run(), Err(Error::Status(_))));
        assert_eq!(driver.context().state(), AuthState::Failed);
    }
}
