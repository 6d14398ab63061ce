use std::fmt;

use bytes::Bytes;
use nexum_apdu_core::{Command, Response, StatusWord};
use tracing::{debug, trace, warn};

use crate::{
    Error, ProtocolContext, Result,
    auth::{AuthState, CredentialAuthenticator, Scheme},
    context::Role,
    events::{Event, EventSender},
    secure_channel::SM_CLASS_BITS,
};

/// The requests a credential understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRequest {
    /// `SELECT` by application identifier
    SelectApplication,
    /// Badge application file selection
    SelectAdf,
    /// First authentication step
    Challenge,
    /// Second authentication step
    Authenticate,
    /// Any command carrying secure messaging
    Protected,
}

/// Header pattern an incoming command must match
///
/// Unset fields match anything; `data_prefix` must be a prefix of the command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPattern {
    cla_mask: u8,
    cla: u8,
    ins: Option<u8>,
    p1: Option<u8>,
    p2: Option<u8>,
    data_prefix: &'static [u8],
}

impl RequestPattern {
    /// Match an unprotected command with this class and instruction
    pub const fn new(cla: u8, ins: u8) -> Self {
        Self {
            cla_mask: 0xFF,
            cla,
            ins: Some(ins),
            p1: None,
            p2: None,
            data_prefix: &[],
        }
    }

    /// Match any command with the secure messaging class bits set
    pub const fn protected() -> Self {
        Self {
            cla_mask: SM_CLASS_BITS,
            cla: SM_CLASS_BITS,
            ins: None,
            p1: None,
            p2: None,
            data_prefix: &[],
        }
    }

    /// Require P1
    pub const fn with_p1(mut self, p1: u8) -> Self {
        self.p1 = Some(p1);
        self
    }

    /// Require P2
    pub const fn with_p2(mut self, p2: u8) -> Self {
        self.p2 = Some(p2);
        self
    }

    /// Require the payload to start with `prefix`
    pub const fn with_data_prefix(mut self, prefix: &'static [u8]) -> Self {
        self.data_prefix = prefix;
        self
    }

    /// Whether `command` matches
    pub fn matches(&self, command: &Command) -> bool {
        command.cla & self.cla_mask == self.cla
            && self.ins.is_none_or(|ins| ins == command.ins)
            && self.p1.is_none_or(|p1| p1 == command.p1)
            && self.p2.is_none_or(|p2| p2 == command.p2)
            && command
                .data()
                .unwrap_or_default()
                .starts_with(self.data_prefix)
    }
}

type Route = (RequestPattern, CredentialRequest);

// Protected commands are routed first: their class byte never matches an unprotected pattern.
const BAC_ROUTES: &[Route] = &[
    (RequestPattern::protected(), CredentialRequest::Protected),
    (
        RequestPattern::new(0x00, 0xA4).with_p1(0x04),
        CredentialRequest::SelectApplication,
    ),
    (
        RequestPattern::new(0x00, 0x84).with_p1(0x00).with_p2(0x00),
        CredentialRequest::Challenge,
    ),
    (
        RequestPattern::new(0x00, 0x82).with_p1(0x00).with_p2(0x00),
        CredentialRequest::Authenticate,
    ),
];

const BADGE_ROUTES: &[Route] = &[
    (RequestPattern::protected(), CredentialRequest::Protected),
    (
        RequestPattern::new(0x00, 0xA4).with_p1(0x04),
        CredentialRequest::SelectApplication,
    ),
    (
        RequestPattern::new(0x80, 0xA5).with_p1(0x04).with_p2(0x00),
        CredentialRequest::SelectAdf,
    ),
    (
        RequestPattern::new(0x00, 0x87)
            .with_p1(0x00)
            .with_data_prefix(&[0x7C, 0x02, 0x81]),
        CredentialRequest::Challenge,
    ),
    (
        RequestPattern::new(0x00, 0x87)
            .with_p1(0x00)
            .with_data_prefix(&[0x7C, 0x2A, 0x82]),
        CredentialRequest::Authenticate,
    ),
];

const fn routes(scheme: Scheme) -> &'static [Route] {
    match scheme {
        Scheme::Bac => BAC_ROUTES,
        Scheme::Badge => BADGE_ROUTES,
    }
}

/// Drives the credential side
///
/// Each complete inbound message is handed to [`handle`](Self::handle), which produces at
/// most one reply. Input that matches no route, or that is malformed or out of sequence, is
/// logged and dropped without touching the session in progress.
pub struct CredentialDriver {
    authenticator: Box<dyn CredentialAuthenticator>,
    routes: &'static [Route],
    ctx: ProtocolContext,
    events: EventSender,
    detected: bool,
}

impl fmt::Debug for CredentialDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialDriver")
            .field("scheme", &self.authenticator.scheme())
            .field("phase", &self.ctx.state())
            .finish_non_exhaustive()
    }
}

impl CredentialDriver {
    /// Create a driver answering for `authenticator`
    pub fn new(authenticator: impl CredentialAuthenticator + 'static) -> Self {
        let routes = routes(authenticator.scheme());
        Self {
            authenticator: Box::new(authenticator),
            routes,
            ctx: ProtocolContext::new(Role::Credential),
            events: EventSender::disabled(),
            detected: false,
        }
    }

    /// Report session events to `events`
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Authentication phase of the current session
    pub const fn phase(&self) -> AuthState {
        self.ctx.state()
    }

    /// The session context
    pub const fn context(&self) -> &ProtocolContext {
        &self.ctx
    }

    /// Classify an incoming command
    pub fn route(&self, command: &Command) -> Option<CredentialRequest> {
        self.routes
            .iter()
            .find(|(pattern, _)| pattern.matches(command))
            .map(|(_, request)| *request)
    }

    /// Answer one complete inbound message
    pub fn handle(&mut self, raw: &[u8]) -> Option<Bytes> {
        trace!(command = %hex::encode(raw), "Credential received");
        let command = match Command::from_bytes(raw) {
            Ok(command) => command,
            Err(error) => {
                warn!(%error, "Dropping malformed command");
                return None;
            }
        };
        let Some(request) = self.route(&command) else {
            warn!(header = %command.header(), "Ignoring unrecognised command");
            return None;
        };
        debug!(?request, phase = %self.ctx.state(), "Routing request");

        let result = match request {
            CredentialRequest::SelectApplication => {
                self.authenticator.select_application(&mut self.ctx, &command)
            }
            CredentialRequest::SelectAdf => self.authenticator.select_adf(&mut self.ctx, &command),
            CredentialRequest::Challenge => self.authenticator.challenge(&mut self.ctx, &command),
            CredentialRequest::Authenticate => {
                self.authenticator.authenticate(&mut self.ctx, &command)
            }
            CredentialRequest::Protected => self.serve_protected(&command),
        };

        match result {
            Ok(response) => {
                self.mark_detected(request);
                if request == CredentialRequest::Authenticate && self.ctx.is_authenticated() {
                    self.emit(Event::Authenticated);
                }
                trace!(response = %hex::encode(response.to_bytes()), "Credential replied");
                Some(response.to_bytes())
            }
            Err(error) => self.reject(request, error).map(|status| {
                Bytes::copy_from_slice(&status.to_bytes())
            }),
        }
    }

    fn serve_protected(&mut self, command: &Command) -> Result<Response> {
        let request = self.ctx.unwrap_command(command)?;
        self.emit(Event::ObjectRequested);

        let reply = self.authenticator.serve(&request);
        let protected = self.ctx.wrap_response(&reply)?;
        if reply.is_success() {
            self.emit(Event::Success);
            self.detected = false;
        }
        Ok(protected)
    }

    /// Pick the status to answer a failed request with, if any
    ///
    /// Failed verification, counter exhaustion, an unsupported algorithm and any error on a
    /// protected request end the session. Anything else is malformed or out of sequence and
    /// is dropped with the session left as it was.
    fn reject(&mut self, request: CredentialRequest, error: Error) -> Option<StatusWord> {
        if matches!(error, Error::NotAuthenticated) {
            warn!(?request, "Protected request without a secure channel");
            return Some(StatusWord::NO_SECURE_MESSAGING);
        }

        let fatal = request == CredentialRequest::Protected
            || matches!(
                error,
                Error::Integrity(_)
                    | Error::EchoMismatch(_)
                    | Error::CounterExhausted
                    | Error::UnsupportedAlgorithm(_)
            );
        if !fatal {
            warn!(?request, %error, phase = %self.ctx.state(), "Dropping malformed request");
            return None;
        }

        warn!(?request, %error, "Credential request failed");
        self.mark_detected(request);
        self.ctx.fail();
        self.emit(Event::Error(error.kind()));
        self.detected = false;

        match (request, &error) {
            (CredentialRequest::Authenticate, Error::Integrity(_) | Error::EchoMismatch(_)) => {
                Some(StatusWord::VERIFICATION_FAILED)
            }
            (CredentialRequest::Protected, Error::Integrity(_)) => {
                Some(StatusWord::NO_SECURE_MESSAGING)
            }
            (CredentialRequest::Protected, _) => Some(StatusWord::SM_DATA_OBJECTS_MISSING),
            _ => None,
        }
    }

    // The first request of a session that the credential acted on
    fn mark_detected(&mut self, request: CredentialRequest) {
        if !self.detected && request != CredentialRequest::Protected {
            self.detected = true;
            self.emit(Event::Detected);
        }
    }

    fn emit(&self, event: Event) {
        self.events
            .emit(self.authenticator.scheme(), Role::Credential, event);
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::{
        ErrorKind,
        auth::{bac::BacCredential, badge::{BadgeCredential, BadgeKeyset, DEFAULT_OBJECT_ID}},
        crypto::Key128,
        events::event_channel,
    };

    fn bac_driver() -> CredentialDriver {
        CredentialDriver::new(BacCredential::new(
            Key128::new([0x11; 16]),
            Key128::new([0x22; 16]),
            hex!("0102").to_vec(),
        ))
    }

    fn badge_driver() -> CredentialDriver {
        let keyset = BadgeKeyset {
            read_key: Key128::new([0x01; 16]),
            privacy_enc: Key128::new([0x02; 16]),
            privacy_mac: Key128::new([0x03; 16]),
        };
        CredentialDriver::new(BadgeCredential::new(
            keyset,
            DEFAULT_OBJECT_ID,
            hex!("0102030405060708"),
            hex!("3000").to_vec(),
        ))
    }

    #[test]
    fn test_routes() {
        let bac = bac_driver();
        assert_eq!(
            bac.route(&Command::from_bytes(&hex!("00A4040C07A0000002471001")).unwrap()),
            Some(CredentialRequest::SelectApplication)
        );
        assert_eq!(
            bac.route(&Command::from_bytes(&hex!("0084000008")).unwrap()),
            Some(CredentialRequest::Challenge)
        );
        assert_eq!(
            bac.route(&Command::from_bytes(&hex!("0CB081000D9701008E080102030405060708 00")).unwrap()),
            Some(CredentialRequest::Protected)
        );
        assert_eq!(bac.route(&Command::new(0x80, 0xA5, 0x04, 0x00)), None);

        let badge = badge_driver();
        assert_eq!(
            badge.route(&Command::from_bytes(&hex!("00870001047C02810000")).unwrap()),
            Some(CredentialRequest::Challenge)
        );
        assert_eq!(
            badge.route(&Command::new_with_data(0x00, 0x87, 0x00, 0x01, vec![0x7C, 0x2A, 0x82, 0x28])),
            Some(CredentialRequest::Authenticate)
        );
        assert_eq!(
            badge.route(&Command::new_with_data(0x00, 0x87, 0x00, 0x01, vec![0x7C, 0x02, 0x85, 0x00])),
            None
        );
        assert_eq!(
            badge.route(&Command::new(0x80, 0xA5, 0x04, 0x00)),
            Some(CredentialRequest::SelectAdf)
        );
    }

    #[test]
    fn test_unmatched_and_malformed_input_is_ignored() {
        let (sender, receiver) = event_channel();
        let mut driver = bac_driver().with_events(sender);
        assert_eq!(driver.handle(&hex!("00CA0000")), None);
        assert_eq!(driver.handle(&hex!("00")), None);
        assert_eq!(driver.phase(), AuthState::Idle);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_unknown_application() {
        let mut driver = badge_driver();
        let reply = driver.handle(&hex!("00A4040007A0000002471001")).unwrap();
        assert_eq!(reply.as_ref(), &hex!("6A82"));
    }

    #[test]
    fn test_protected_request_without_channel() {
        let mut driver = bac_driver();
        let reply = driver
            .handle(&hex!("0CB081000D9701008E08010203040506070800"))
            .unwrap();
        assert_eq!(reply.as_ref(), &hex!("6988"));
    }

    #[test]
    fn test_failed_verification_answers_6300() {
        let (sender, receiver) = event_channel();
        let mut driver = bac_driver().with_events(sender);
        let challenge = driver.handle(&hex!("0084000008")).unwrap();
        assert_eq!(challenge.len(), 10);
        assert_eq!(driver.phase(), AuthState::Challenge1);

        let mut forged = hex!("0082000028").to_vec();
        forged.extend_from_slice(&[0x5A; 40]);
        forged.push(0x28);
        let reply = driver.handle(&forged).unwrap();
        assert_eq!(reply.as_ref(), &hex!("6300"));
        assert_eq!(driver.phase(), AuthState::Failed);

        let events: Vec<_> = receiver.try_iter().map(|e| e.event).collect();
        assert_eq!(events, vec![Event::Detected, Event::Error(ErrorKind::Integrity)]);

        // A new challenge starts over.
        driver.handle(&hex!("0084000008")).unwrap();
        assert_eq!(driver.phase(), AuthState::Challenge1);
    }

    #[test]
    fn test_truncated_cryptogram_keeps_challenge() {
        let (sender, receiver) = event_channel();
        let mut driver = bac_driver().with_events(sender);
        driver.handle(&hex!("0084000008")).unwrap();

        assert_eq!(driver.handle(&hex!("008200000401020304")), None);
        assert_eq!(driver.phase(), AuthState::Challenge1);
        let events: Vec<_> = receiver.try_iter().map(|e| e.event).collect();
        assert_eq!(events, vec![Event::Detected]);

        // The pending challenge still verifies the next cryptogram.
        let mut forged = hex!("0082000028").to_vec();
        forged.extend_from_slice(&[0x5A; 40]);
        forged.push(0x28);
        assert_eq!(driver.handle(&forged).unwrap().as_ref(), &hex!("6300"));
    }

    #[test]
    fn test_repeated_badge_challenge_is_dropped() {
        let mut driver = badge_driver();
        let mut select_adf = vec![0x06, DEFAULT_OBJECT_ID.len() as u8];
        select_adf.extend_from_slice(&DEFAULT_OBJECT_ID);
        let select_adf = Command::new_with_data(0x80, 0xA5, 0x04, 0x00, select_adf);
        driver.handle(&select_adf.to_bytes()).unwrap();

        let challenge = hex!("00870001047C02810000");
        let reply = driver.handle(&challenge).unwrap();
        assert_eq!(&reply[..4], &hex!("7C0A8108"));
        assert_eq!(driver.phase(), AuthState::Challenge1);

        assert_eq!(driver.handle(&challenge), None);
        assert_eq!(driver.phase(), AuthState::Challenge1);
        assert!(driver.context().params().is_ok());
    }
}
