//! # renderer-eventing
//!
//! The event subscription and dispatch core of renderer-sdk.
//!
//! Networked media renderers announce state changes through a GENA-style
//! protocol: the library SUBSCRIBEs to a remote service with a callback URL,
//! renews the granted lease before it expires, and receives NOTIFY requests
//! on a local listener. This crate owns all three legs:
//!
//! - [`Subscription`] keeps one outbound lease alive per remote service.
//! - [`EventBus`] runs the local listener, parses inbound notifications into
//!   [`EventMessage`] values, and routes them by [`EventKind`].
//! - Each local [`EventSubscriber`] gets a dedicated dispatch thread, so a
//!   slow subscriber can never stall the accept loop or its peers. Messages
//!   for the same subscriber arrive in dispatch order; there is no ordering
//!   across subscribers.
//!
//! The core never interprets notification payloads: a message is an event
//! kind plus an ordered list of opaque strings.

mod bus;
mod config;
mod error;
mod gena;
mod message;
mod notify;
mod subscriber;

pub(crate) mod dispatch;

pub use bus::EventBus;
pub use config::EventConfig;
pub use error::{NotifyError, SubscriptionError};
pub use gena::{LeaseState, Subscription};
pub use message::{
    EventKind, EventMessage, EventMessagePtr, SubscriptionId, STATUS_FAILED, STATUS_STARTED,
    STATUS_STOPPED,
};
pub use subscriber::EventSubscriber;
