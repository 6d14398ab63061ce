//! Events raised to the collaborators driving a session

use crossbeam_channel::{Receiver, Sender, unbounded};
use derive_more::Display;
use tracing::trace;

use crate::{ErrorKind, auth::Scheme, context::Role};

/// Session milestones, in the order a successful reader session raises them
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Event {
    /// A credential answered (reader) or a reader started talking (credential)
    #[display("detected")]
    Detected,
    /// Mutual authentication succeeded
    #[display("authenticated")]
    Authenticated,
    /// The protected object request was sent (reader) or received (credential)
    #[display("object requested")]
    ObjectRequested,
    /// The object was read (reader) or served (credential)
    #[display("success")]
    Success,
    /// The session ended with an error
    #[display("error: {_0}")]
    Error(ErrorKind),
}

/// An event with the session it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Scheme of the session
    pub scheme: Scheme,
    /// Side that raised the event
    pub role: Role,
    /// What happened
    pub event: Event,
}

/// Receiver for session events
pub type EventReceiver = Receiver<SessionEvent>;

/// Create an unbounded event channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = unbounded();
    (EventSender(Some(sender)), receiver)
}

/// Sending half handed to drivers
///
/// A dropped receiver never fails a session; events are then discarded.
#[derive(Debug, Clone, Default)]
pub struct EventSender(Option<Sender<SessionEvent>>);

impl EventSender {
    /// A sender that discards every event
    pub const fn disabled() -> Self {
        Self(None)
    }

    /// Raise `event`
    pub fn emit(&self, scheme: Scheme, role: Role, event: Event) {
        trace!(%scheme, %role, %event, "Session event");
        if let Some(sender) = &self.0 {
            let _ = sender.send(SessionEvent {
                scheme,
                role,
                event,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_delivered_in_order() {
        let (sender, receiver) = event_channel();
        sender.emit(Scheme::Bac, Role::Reader, Event::Detected);
        sender.emit(Scheme::Bac, Role::Reader, Event::Error(ErrorKind::Integrity));

        let events: Vec<_> = receiver.try_iter().map(|e| e.event).collect();
        assert_eq!(events, vec![Event::Detected, Event::Error(ErrorKind::Integrity)]);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (sender, receiver) = event_channel();
        drop(receiver);
        sender.emit(Scheme::Badge, Role::Credential, Event::Success);
        EventSender::disabled().emit(Scheme::Badge, Role::Credential, Event::Success);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(Event::Error(ErrorKind::Transport).to_string(), "error: transport");
        assert_eq!(Event::ObjectRequested.to_string(), "object requested");
    }
}
