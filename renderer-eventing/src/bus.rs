//! The event bus: local notification listener plus subscriber registry.

use crate::config::EventConfig;
use crate::dispatch::SubscriberDispatchThread;
use crate::message::{
    EventKind, EventMessage, EventMessagePtr, SubscriptionId, STATUS_FAILED, STATUS_STARTED,
    STATUS_STOPPED,
};
use crate::notify;
use crate::subscriber::EventSubscriber;
use renderer_sync::{Counter, Event, Mutex, Worker, WorkerPool};
use std::collections::HashMap;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Idle wait between accept attempts. Kept well below the stop-poll bound
/// so an inbound connection never sits in the backlog for the full
/// stop-poll interval.
const ACCEPT_IDLE_POLL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct Registry {
    /// Event kind -> interested subscription ids. Ids whose dispatch thread
    /// is gone are pruned lazily at dispatch time.
    by_kind: HashMap<EventKind, Vec<SubscriptionId>>,
    subscriptions: HashMap<SubscriptionId, SubscriberDispatchThread>,
}

struct BusInner {
    config: EventConfig,
    registry: Mutex<Registry>,
    next_id: AtomicU32,
    pool: WorkerPool,
    /// Raised by `stop`; the accept loop re-checks it at least once per
    /// accept-poll interval.
    stop_flag: Counter,
    stop_wake: Event,
    /// Bind outcome handshake with `start`: 0 pending, 1 bound, -1 failed.
    bind_result: Counter,
    ready: Event,
    bound_port: Counter,
    running: Counter,
}

/// Receives inbound notifications and fans them out to local subscribers.
///
/// One bus per process. The listener thread accepts connections and hands
/// each to an owned [`WorkerPool`] worker that parses a single NOTIFY
/// request and dispatches the resulting message. Every registered
/// subscriber gets a dedicated dispatch thread, so `dispatch_event` never
/// blocks on subscriber code and a slow subscriber cannot stall the accept
/// path or its peers.
///
/// Listener lifecycle transitions are themselves announced as synthetic
/// [`EventKind::HandlerStatus`] messages with subject
/// `[status, address, port]`.
pub struct EventBus {
    inner: Arc<BusInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(config: EventConfig) -> Self {
        let pool = WorkerPool::new(config.worker_max);
        pool.set_keep_alive(config.keep_alive);
        Self {
            inner: Arc::new(BusInner {
                config,
                registry: Mutex::new(Registry::default()),
                next_id: AtomicU32::new(1),
                pool,
                stop_flag: Counter::new(0),
                stop_wake: Event::new(),
                bind_result: Counter::new(0),
                ready: Event::new(),
                bound_port: Counter::new(0),
                running: Counter::new(0),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Start the listener thread and wait for the bind outcome.
    ///
    /// Returns false when no port could be bound (also announced as a
    /// [`STATUS_FAILED`] handler-status message) or the thread failed to
    /// start. Idempotent while the listener runs.
    pub fn start(&self) -> bool {
        let mut listener = self.listener.lock();
        if let Some(handle) = listener.as_ref() {
            if !handle.is_finished() {
                return true;
            }
        }
        if let Some(handle) = listener.take() {
            let _ = handle.join();
        }
        self.inner.stop_flag.store(0);
        self.inner.bind_result.store(0);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("event-listener".into())
            .spawn(move || listener_main(inner));
        match spawned {
            Ok(handle) => *listener = Some(handle),
            Err(e) => {
                warn!("listener thread failed to start: {e}");
                return false;
            }
        }
        drop(listener);
        while self.inner.bind_result.load() == 0 {
            self.inner.ready.wait_timeout(Duration::from_millis(100));
        }
        self.inner.bind_result.load() > 0
    }

    /// Signal the listener thread and join it.
    pub fn stop(&self) {
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            self.inner.stop_flag.store(1);
            self.inner.stop_wake.broadcast();
            let _ = handle.join();
        }
    }

    pub fn has_started(&self) -> bool {
        self.inner.running.load() == 1
    }

    /// The port the listener actually bound, once `start` succeeded.
    pub fn listen_port(&self) -> u16 {
        self.inner.bound_port.load() as u16
    }

    /// Register a subscriber and start its dispatch thread.
    ///
    /// The bus keeps only a weak back-reference; the caller stays the owner
    /// and revokes the registration in its own teardown path. Returns
    /// `None` when the dispatch thread could not be started. Issued ids are
    /// strictly increasing and never reused.
    pub fn create_subscription(
        &self,
        subscriber: &Arc<dyn EventSubscriber>,
    ) -> Option<SubscriptionId> {
        let id = SubscriptionId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        match SubscriberDispatchThread::spawn(id, Arc::downgrade(subscriber)) {
            Ok(thread) => {
                self.inner.registry.lock().subscriptions.insert(id, thread);
                Some(id)
            }
            Err(e) => {
                warn!("dispatch thread failed to start ({id}): {e}");
                None
            }
        }
    }

    /// Register interest of `id` in `kind`. False for unknown ids;
    /// idempotent otherwise.
    pub fn subscribe_for_event(&self, id: SubscriptionId, kind: EventKind) -> bool {
        let mut registry = self.inner.registry.lock();
        if !registry.subscriptions.contains_key(&id) {
            return false;
        }
        let ids = registry.by_kind.entry(kind).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        true
    }

    /// Stop and discard the dispatch thread of `id`. Kind registrations
    /// referencing it are pruned at the next dispatch.
    pub fn revoke_subscription(&self, id: SubscriptionId) {
        let removed = self.inner.registry.lock().subscriptions.remove(&id);
        // Joining the dispatch thread happens outside the registry lock; a
        // subscriber callback may itself be dispatching.
        drop(removed);
    }

    /// Revoke every registration of `subscriber`.
    pub fn revoke_all_subscriptions(&self, subscriber: &Arc<dyn EventSubscriber>) {
        let target = Arc::downgrade(subscriber);
        let mut removed = Vec::new();
        {
            let mut registry = self.inner.registry.lock();
            let ids: Vec<SubscriptionId> = registry
                .subscriptions
                .iter()
                .filter(|(_, thread)| Weak::ptr_eq(thread.subscriber(), &target))
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                if let Some(thread) = registry.subscriptions.remove(&id) {
                    removed.push(thread);
                }
            }
        }
        drop(removed);
    }

    /// Post `message` to every live subscription registered for its kind.
    ///
    /// Non-blocking for the caller: the registry lock is held only for the
    /// map operations and each post is a queue append. Stale ids are pruned
    /// here rather than eagerly.
    pub fn dispatch_event(&self, message: EventMessagePtr) {
        dispatch(&self.inner, message);
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop();
        self.inner.pool.suspend();
        let threads: Vec<SubscriberDispatchThread> = {
            let mut registry = self.inner.registry.lock();
            registry.by_kind.clear();
            registry.subscriptions.drain().map(|(_, t)| t).collect()
        };
        drop(threads);
    }
}

fn dispatch(inner: &BusInner, message: EventMessagePtr) {
    // Dispatch threads of dead subscribers are collected here and joined
    // after the registry lock is released.
    let mut dead = Vec::new();
    {
        let mut registry = inner.registry.lock();
        let Registry {
            by_kind,
            subscriptions,
        } = &mut *registry;
        let Some(ids) = by_kind.get_mut(&message.kind) else {
            return;
        };
        ids.retain(|id| {
            if subscriptions.get(id).is_some_and(|t| t.is_live()) {
                if let Some(thread) = subscriptions.get(id) {
                    thread.post_message(Arc::clone(&message));
                }
                return true;
            }
            // Either revoked earlier, or the owner dropped its subscriber
            // without revoking; both ways the registration is stale.
            match subscriptions.remove(id) {
                Some(thread) => {
                    debug!("pruning dead subscriber {id}");
                    dead.push(thread);
                }
                None => debug!("pruning stale registration {id}"),
            }
            false
        });
    }
    drop(dead);
}

fn announce_status(inner: &BusInner, status: &str) {
    debug!("event listener status: {status}");
    let message = EventMessage::new(
        EventKind::HandlerStatus,
        vec![
            status.to_string(),
            inner.config.bind_address.to_string(),
            inner.bound_port.load().to_string(),
        ],
    );
    dispatch(inner, Arc::new(message));
}

fn bind_listener(config: &EventConfig) -> Option<TcpListener> {
    let mut port = config.port;
    let attempts = if port == 0 { 1 } else { config.bind_retries.max(1) };
    for _ in 0..attempts {
        info!("binding event listener on port {port}");
        match TcpListener::bind(SocketAddr::new(config.bind_address, port)) {
            Ok(listener) => return Some(listener),
            Err(e) => {
                warn!("bind failed on port {port}: {e}");
                port = port.wrapping_add(1);
            }
        }
    }
    None
}

fn listener_main(inner: Arc<BusInner>) {
    inner.running.store(1);
    let status = listen(&inner);
    announce_status(&inner, status);
    inner.running.store(0);
}

fn listen(inner: &Arc<BusInner>) -> &'static str {
    let Some(listener) = bind_listener(&inner.config) else {
        inner.bind_result.store(-1);
        inner.ready.broadcast();
        return STATUS_FAILED;
    };
    let bound = listener
        .local_addr()
        .map(|addr| addr.port())
        .unwrap_or(inner.config.port);
    if let Err(e) = listener.set_nonblocking(true) {
        warn!("listener setup failed: {e}");
        inner.bind_result.store(-1);
        inner.ready.broadcast();
        return STATUS_FAILED;
    }
    inner.bound_port.store(i64::from(bound));
    inner.bind_result.store(1);
    inner.ready.broadcast();
    info!(
        "listening for notifications on {}:{}",
        inner.config.bind_address, bound
    );
    announce_status(inner, STATUS_STARTED);

    while inner.stop_flag.load() == 0 {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("accepted notification connection from {peer}");
                let worker = ConnectionWorker {
                    bus: Arc::downgrade(inner),
                    stream: Some(stream),
                };
                if !inner.pool.enqueue(Box::new(worker)) {
                    warn!("connection dropped: worker pool is stopped");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                inner
                    .stop_wake
                    .wait_timeout(inner.config.accept_poll.min(ACCEPT_IDLE_POLL));
            }
            Err(e) if is_transient(e.kind()) => {
                warn!("accept failed: {e}");
            }
            Err(e) => {
                warn!("fatal accept error: {e}");
                return STATUS_FAILED;
            }
        }
    }
    STATUS_STOPPED
}

fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    )
}

/// Parses exactly one NOTIFY request from an accepted connection.
struct ConnectionWorker {
    bus: Weak<BusInner>,
    stream: Option<TcpStream>,
}

impl Worker for ConnectionWorker {
    fn process(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let _ = stream.set_read_timeout(Some(CONNECTION_READ_TIMEOUT));
        let mut reader = BufReader::new(&stream);
        let result = notify::parse_notify(&mut reader);
        if let Err(e) = notify::write_response(&mut (&stream), &result) {
            debug!("failed to answer notification: {e}");
        }
        match result {
            Ok(message) => {
                if let Some(inner) = self.bus.upgrade() {
                    dispatch(&inner, Arc::new(message));
                }
            }
            Err(e) => debug!("discarded inbound request: {e}"),
        }
    }
}
