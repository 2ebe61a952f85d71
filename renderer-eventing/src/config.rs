//! Bus configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Configuration passed at [`EventBus`](crate::EventBus) construction.
///
/// The listener port is an explicit value here rather than a process-global
/// constant; on a bind conflict the bus retries on successive port numbers.
/// Port 0 binds an ephemeral port directly with no retry.
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Local address the notification listener binds to.
    pub bind_address: IpAddr,
    /// First port to try.
    pub port: u16,
    /// How many successive ports to try before giving up.
    pub bind_retries: u32,
    /// Upper bound on how long the accept loop waits before re-checking for
    /// a stop request.
    pub accept_poll: Duration,
    /// Maximum number of connection-parsing worker threads.
    pub worker_max: usize,
    /// Idle keep-alive for connection workers.
    pub keep_alive: Duration,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 1400,
            bind_retries: 10,
            accept_poll: Duration::from_secs(1),
            worker_max: 8,
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl EventConfig {
    /// Listener on `port`, other settings at their defaults.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}
