//! The subscriber capability.

use crate::message::EventMessagePtr;

/// Receiver of dispatched event messages.
///
/// Implemented by the collaborators that consume the core: service proxies,
/// per-speaker players, the top-level system object. The bus holds
/// registrations as `Weak` references — it never owns a subscriber, and an
/// owner must revoke its registrations in its own teardown path rather than
/// rely on the weak reference going dead.
///
/// `handle_event_message` is invoked on the subscriber's dedicated dispatch
/// thread, one message at a time, in the order the bus observed them. A
/// callback that blocks stalls only its own dispatch thread.
pub trait EventSubscriber: Send + Sync {
    fn handle_event_message(&self, message: EventMessagePtr);
}
