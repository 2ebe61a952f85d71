//! Event messages and routing tags.

use std::sync::Arc;

/// Category of a notification, used only for routing.
///
/// The core routes on the kind and never looks further into a message.
/// `Custom` lets a host application mint its own kinds without touching
/// this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Listener lifecycle announcements from the bus itself.
    HandlerStatus,
    /// A GENA property-change notification (`NT: upnp:event`).
    UpnpPropertyChange,
    /// An inbound notification the parser could not classify.
    Unknown,
    /// Application-defined kind.
    Custom(u32),
}

/// Listener status subjects carried by [`EventKind::HandlerStatus`] messages.
pub const STATUS_STARTED: &str = "STARTED";
pub const STATUS_STOPPED: &str = "STOPPED";
pub const STATUS_FAILED: &str = "FAILED";

/// One parsed notification.
///
/// The subject is an opaque, ordered payload. By convention of the callers
/// the first three elements of a property-change subject are the
/// subscription SID, the event sequence number, and the property blob, but
/// the core does not enforce that shape.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub kind: EventKind,
    pub subject: Vec<String>,
}

impl EventMessage {
    pub fn new(kind: EventKind, subject: Vec<String>) -> Self {
        Self { kind, subject }
    }
}

/// Messages are shared read-only across subscriber threads.
pub type EventMessagePtr = Arc<EventMessage>;

/// Process-unique identifier of a local subscriber registration.
///
/// Minted by the bus from a monotonic counter starting at 1; ids are never
/// reused, and 0 is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u32);

impl SubscriptionId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
