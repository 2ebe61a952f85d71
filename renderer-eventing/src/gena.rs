//! Outbound GENA lease management.
//!
//! One [`Subscription`] per (remote service, callback URL) pair. A
//! background thread performs the initial SUBSCRIBE, renews at 90 % of the
//! granted lease, and sends a best-effort UNSUBSCRIBE on stop. The thread
//! never blocks other components: every public method besides construction
//! is fire-and-signal.

use crate::error::SubscriptionError;
use renderer_sync::{Counter, Event, Mutex};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const RETRY_DELAY: Duration = Duration::from_secs(1);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lease lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// The local callback address is not resolved yet.
    Unconfigured,
    /// Resolving the callback address / preparing a fresh SUBSCRIBE.
    Configuring,
    /// A lease is held; the thread sleeps until the renewal point.
    Subscribed,
    /// A renewal request is in flight.
    Renewing,
    /// The thread exited; any held lease was released best-effort.
    Unsubscribed,
}

#[derive(Debug)]
struct LeaseInner {
    state: LeaseState,
    sid: Option<String>,
    local_ip: Option<String>,
    granted_seconds: u32,
}

struct LeaseShared {
    endpoint: Url,
    /// `host:port` of the remote device, for the HOST header and for the
    /// throwaway connection that resolves the outbound local IP.
    host: String,
    callback_port: u16,
    lease_seconds: u32,
    inner: Mutex<LeaseInner>,
    wakeup: Event,
    stop: Counter,
}

/// A GENA event lease against one remote service.
///
/// Construction resolves the callback address best-effort; `start` spawns
/// the lease thread. `ask_renewal` forces an early renewal with the
/// existing SID. Dropping the subscription stops the thread and releases
/// the lease best-effort; an UNSUBSCRIBE failure is not retried, the lease
/// simply expires remotely.
pub struct Subscription {
    shared: Arc<LeaseShared>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// `endpoint_url` is the full event URL of the remote service, e.g.
    /// `http://192.168.1.40:1400/MediaRenderer/AVTransport/Event`.
    pub fn new(
        endpoint_url: &str,
        callback_port: u16,
        lease_seconds: u32,
    ) -> Result<Self, SubscriptionError> {
        let endpoint = Url::parse(endpoint_url)
            .map_err(|e| SubscriptionError::InvalidEndpoint(e.to_string()))?;
        let host = endpoint
            .host_str()
            .ok_or_else(|| SubscriptionError::InvalidEndpoint("no host".into()))?;
        let port = endpoint.port_or_known_default().unwrap_or(80);
        let host = format!("{host}:{port}");
        let shared = Arc::new(LeaseShared {
            endpoint,
            host,
            callback_port,
            lease_seconds,
            inner: Mutex::new(LeaseInner {
                state: LeaseState::Unconfigured,
                sid: None,
                local_ip: None,
                granted_seconds: lease_seconds,
            }),
            wakeup: Event::new(),
            stop: Counter::new(0),
        });
        configure(&shared);
        Ok(Self {
            shared,
            handle: None,
        })
    }

    /// Whether the callback address resolved.
    pub fn is_valid(&self) -> bool {
        self.shared.inner.lock().local_ip.is_some()
    }

    pub fn state(&self) -> LeaseState {
        self.shared.inner.lock().state
    }

    /// The SID granted by the last successful SUBSCRIBE.
    pub fn sid(&self) -> Option<String> {
        self.shared.inner.lock().sid.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the lease thread. Idempotent while it runs.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return true;
        }
        self.shared.stop.store(0);
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("gena-lease".into())
            .spawn(move || lease_main(shared))
        {
            Ok(handle) => {
                self.handle = Some(handle);
                true
            }
            Err(e) => {
                warn!("lease thread failed to start: {e}");
                false
            }
        }
    }

    /// Force an early renewal: the sleeping lease thread wakes and sends a
    /// renewal SUBSCRIBE with the existing SID.
    pub fn ask_renewal(&self) {
        if self.is_running() {
            self.shared.wakeup.signal();
        }
    }

    /// Signal the thread and join it; a held lease is released best-effort.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.stop.store(1);
            self.shared.wakeup.signal();
            let _ = handle.join();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_state(shared: &LeaseShared, state: LeaseState) {
    shared.inner.lock().state = state;
}

fn lease_main(shared: Arc<LeaseShared>) {
    let mut subscribed = false;
    while shared.stop.load() == 0 {
        let configured = shared.inner.lock().local_ip.is_some();
        if configured {
            if subscribed {
                set_state(&shared, LeaseState::Renewing);
            }
            match subscribe(&shared, subscribed) {
                Ok(granted) => {
                    subscribed = true;
                    set_state(&shared, LeaseState::Subscribed);
                    // Renew at 90 % of the granted lease, or earlier when
                    // asked to.
                    let sleep = Duration::from_millis(u64::from(granted) * 900);
                    shared.wakeup.wait_timeout(sleep);
                    continue;
                }
                Err(e) => {
                    warn!("SUBSCRIBE to {} failed: {e}", shared.endpoint);
                    subscribed = false;
                    shared.inner.lock().sid = None;
                }
            }
        }
        // Reconfigure and wait before retrying, forever.
        set_state(&shared, LeaseState::Configuring);
        configure(&shared);
        shared.wakeup.wait_timeout(RETRY_DELAY);
    }
    if subscribed {
        if let Err(e) = unsubscribe(&shared) {
            debug!("UNSUBSCRIBE from {} failed: {e}", shared.endpoint);
        }
    }
    set_state(&shared, LeaseState::Unsubscribed);
}

/// Resolve the outbound-facing local IP by opening a throwaway connection
/// to the remote host.
fn configure(shared: &LeaseShared) {
    let addr = shared
        .host
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next());
    let local_ip = addr.and_then(|addr| {
        TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .and_then(|stream| stream.local_addr())
            .map(|local| local.ip().to_string())
            .ok()
    });
    let mut inner = shared.inner.lock();
    match local_ip {
        Some(ip) => {
            debug!("callback address resolved to {ip}");
            inner.local_ip = Some(ip);
            inner.state = LeaseState::Configuring;
        }
        None => {
            inner.local_ip = None;
            inner.state = LeaseState::Unconfigured;
        }
    }
}

fn client() -> Result<reqwest::blocking::Client, SubscriptionError> {
    reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| SubscriptionError::Network(e.to_string()))
}

fn method(name: &'static [u8]) -> Result<reqwest::Method, SubscriptionError> {
    reqwest::Method::from_bytes(name).map_err(|e| SubscriptionError::Network(e.to_string()))
}

/// Send a SUBSCRIBE (initial or renewal) and record the granted SID and
/// lease duration. Returns the granted lease in seconds.
fn subscribe(shared: &LeaseShared, renew: bool) -> Result<u32, SubscriptionError> {
    let sid = shared.inner.lock().sid.clone();
    let mut request = client()?
        .request(method(b"SUBSCRIBE")?, shared.endpoint.as_str())
        .header("HOST", &shared.host)
        .header("TIMEOUT", format!("Second-{}", shared.lease_seconds));
    let renewing = renew && sid.is_some();
    if renewing {
        if let Some(sid) = &sid {
            request = request.header("SID", sid);
        }
    } else {
        let local_ip = shared
            .inner
            .lock()
            .local_ip
            .clone()
            .ok_or_else(|| SubscriptionError::Network("callback address unresolved".into()))?;
        request = request
            .header(
                "CALLBACK",
                format!("<http://{}:{}/>", local_ip, shared.callback_port),
            )
            .header("NT", "upnp:event");
    }
    let response = request
        .send()
        .map_err(|e| SubscriptionError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(SubscriptionError::Rejected(response.status().as_u16()));
    }
    let granted_sid = response
        .headers()
        .get("SID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(sid);
    let Some(granted_sid) = granted_sid else {
        return Err(SubscriptionError::MissingSid);
    };
    let granted_seconds = response
        .headers()
        .get("TIMEOUT")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Second-"))
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(shared.lease_seconds);
    debug!(
        "lease granted by {}: sid={granted_sid} timeout={granted_seconds}s renew={renewing}",
        shared.endpoint
    );
    let mut inner = shared.inner.lock();
    inner.sid = Some(granted_sid);
    inner.granted_seconds = granted_seconds;
    Ok(granted_seconds)
}

/// Release the held lease, if any.
fn unsubscribe(shared: &LeaseShared) -> Result<(), SubscriptionError> {
    let Some(sid) = shared.inner.lock().sid.clone() else {
        return Ok(());
    };
    let response = client()?
        .request(method(b"UNSUBSCRIBE")?, shared.endpoint.as_str())
        .header("HOST", &shared.host)
        .header("SID", &sid)
        .send()
        .map_err(|e| SubscriptionError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(SubscriptionError::Rejected(response.status().as_u16()));
    }
    shared.inner.lock().sid = None;
    Ok(())
}
