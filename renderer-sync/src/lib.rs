//! # renderer-sync
//!
//! Threading primitives for the renderer-sdk event core.
//!
//! The event core depends on exact delivery and ordering guarantees, so the
//! substrate it runs on is kept small and explicit: a relaxed atomic
//! [`Counter`], a poison-absorbing [`Mutex`]/[`Condition`] monitor pair, an
//! auto-reset [`Event`], a fair recursive reader/writer [`Latch`], and a
//! bounded elastic [`WorkerPool`].

mod counter;
mod event;
mod latch;
mod mutex;
mod pool;

pub use counter::Counter;
pub use event::Event;
pub use latch::{Latch, LatchGuard, LatchSharedGuard};
pub use mutex::{Condition, Mutex};
pub use pool::{Worker, WorkerPool};
