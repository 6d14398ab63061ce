//! Per-session protocol state

use derive_more::Display;
use nexum_apdu_core::{Command, Response};
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    auth::{AuthParameters, AuthState},
    secure_channel::SecureChannel,
};

/// Which side of the exchange a context drives
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates every step
    #[display("reader")]
    Reader,
    /// Answers requests
    #[display("credential")]
    Credential,
}

/// State of one session: authentication progress, the transient parameters of the attempt
/// in flight and, once authenticated, the secure channel
///
/// Exactly one driver owns a context. Parameters only live between
/// [`begin`](Self::begin) and [`establish`](Self::establish) (or [`fail`](Self::fail)); the
/// channel only exists in [`AuthState::Authenticated`].
#[derive(Debug)]
pub struct ProtocolContext {
    role: Role,
    state: AuthState,
    params: Option<AuthParameters>,
    channel: Option<SecureChannel>,
}

impl ProtocolContext {
    /// Create an idle context
    pub const fn new(role: Role) -> Self {
        Self {
            role,
            state: AuthState::Idle,
            params: None,
            channel: None,
        }
    }

    /// The side this context drives
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Current authentication state
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Whether a secure channel is installed
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated) && self.channel.is_some()
    }

    /// Start an attempt with fresh parameters
    pub fn begin(&mut self, params: AuthParameters) {
        debug!(role = %self.role, suite = %params.suite, "Starting authentication");
        self.channel = None;
        self.params = Some(params);
        self.state = AuthState::Idle;
    }

    /// Parameters of the attempt in flight
    pub fn params(&self) -> Result<&AuthParameters> {
        self.params
            .as_ref()
            .ok_or(Error::Protocol("no authentication in progress"))
    }

    /// Mutable parameters of the attempt in flight
    pub fn params_mut(&mut self) -> Result<&mut AuthParameters> {
        self.params
            .as_mut()
            .ok_or(Error::Protocol("no authentication in progress"))
    }

    /// Move to `next`, refusing to leave a terminal state
    pub fn advance(&mut self, next: AuthState) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::Protocol("authentication already concluded"));
        }
        debug!(role = %self.role, from = %self.state, to = %next, "Authentication state change");
        self.state = next;
        Ok(())
    }

    /// Install the channel and discard the attempt parameters
    pub fn establish(&mut self, channel: SecureChannel) {
        self.params = None;
        self.channel = Some(channel);
        self.state = AuthState::Authenticated;
        info!(role = %self.role, "Secure channel established");
    }

    /// Abort the attempt; key material is wiped
    pub fn fail(&mut self) {
        if self.state != AuthState::Failed {
            warn!(role = %self.role, state = %self.state, "Authentication failed");
        }
        self.params = None;
        self.channel = None;
        self.state = AuthState::Failed;
    }

    /// Release everything and return to idle
    pub fn teardown(&mut self) {
        if self.channel.is_some() || self.params.is_some() {
            debug!(role = %self.role, "Tearing down session");
        }
        self.params = None;
        self.channel = None;
        self.state = AuthState::Idle;
    }

    /// Protect a command (reader side)
    pub fn wrap_command(&mut self, command: &Command) -> Result<Command> {
        let result = self.channel_mut()?.wrap_command(command);
        self.check(result)
    }

    /// Verify and decrypt a response (reader side)
    pub fn unwrap_response(&mut self, response: &Response) -> Result<Response> {
        let result = self.channel_mut()?.unwrap_response(response);
        self.check(result)
    }

    /// Verify and decrypt a command (credential side)
    pub fn unwrap_command(&mut self, command: &Command) -> Result<Command> {
        let result = self.channel_mut()?.unwrap_command(command);
        self.check(result)
    }

    /// Protect a response (credential side)
    pub fn wrap_response(&mut self, response: &Response) -> Result<Response> {
        let result = self.channel_mut()?.wrap_response(response);
        self.check(result)
    }

    /// The installed channel
    pub const fn channel(&self) -> Option<&SecureChannel> {
        self.channel.as_ref()
    }

    fn channel_mut(&mut self) -> Result<&mut SecureChannel> {
        match (&self.state, self.channel.as_mut()) {
            (AuthState::Authenticated, Some(channel)) => Ok(channel),
            _ => Err(Error::NotAuthenticated),
        }
    }

    // A channel that saw a forged or replayed message, or ran out of counter values, is
    // discarded.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if matches!(e, Error::Integrity(_) | Error::CounterExhausted) {
                self.fail();
            }
        }
        result
    }
}
