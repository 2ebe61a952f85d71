//! Integration tests for the event bus: registry semantics, dispatch
//! ordering, and the notification listener.

use renderer_eventing::{
    EventBus, EventConfig, EventKind, EventMessage, EventMessagePtr, EventSubscriber,
    STATUS_FAILED, STATUS_STARTED,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Records every delivered message.
struct Collector {
    seen: Mutex<Vec<EventMessagePtr>>,
}

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn snapshot(&self) -> Vec<EventMessagePtr> {
        self.seen.lock().unwrap().clone()
    }
}

impl EventSubscriber for Collector {
    fn handle_event_message(&self, message: EventMessagePtr) {
        self.seen.lock().unwrap().push(message);
    }
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

fn message(kind: EventKind, subject: Vec<String>) -> EventMessagePtr {
    Arc::new(EventMessage::new(kind, subject))
}

#[test]
fn test_concurrent_subscription_ids_are_distinct_and_increasing() {
    let bus = Arc::new(EventBus::new(EventConfig::with_port(0)));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let bus = Arc::clone(&bus);
        handles.push(thread::spawn(move || {
            let collector = Collector::new();
            let subscriber: Arc<dyn EventSubscriber> = collector;
            let mut ids = Vec::new();
            for _ in 0..50 {
                let id = bus.create_subscription(&subscriber).expect("id");
                assert_ne!(id.as_u32(), 0);
                ids.push(id);
            }
            // Issuance order is strictly increasing per creator.
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            ids
        }));
    }
    let mut all: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let issued = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), issued);
}

#[test]
fn test_unsubscribed_kind_is_a_no_op() {
    let bus = EventBus::new(EventConfig::with_port(0));
    let collector = Collector::new();
    let subscriber: Arc<dyn EventSubscriber> = Arc::clone(&collector) as _;
    let id = bus.create_subscription(&subscriber).unwrap();
    assert!(bus.subscribe_for_event(id, EventKind::Custom(1)));
    assert!(bus.subscribe_for_event(id, EventKind::Custom(2)));
    // Subscribing twice is a no-op, not an error.
    assert!(bus.subscribe_for_event(id, EventKind::Custom(1)));

    bus.dispatch_event(message(EventKind::Custom(3), vec!["c".into()]));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(collector.count(), 0);

    bus.dispatch_event(message(EventKind::Custom(2), vec!["b".into()]));
    assert!(wait_until(Duration::from_secs(5), || collector.count() == 1));
}

#[test]
fn test_two_subscribers_each_receive_one_message() {
    let bus = EventBus::new(EventConfig::with_port(0));
    let first = Collector::new();
    let second = Collector::new();
    let first_sub: Arc<dyn EventSubscriber> = Arc::clone(&first) as _;
    let second_sub: Arc<dyn EventSubscriber> = Arc::clone(&second) as _;
    let a = bus.create_subscription(&first_sub).unwrap();
    let b = bus.create_subscription(&second_sub).unwrap();
    assert!(bus.subscribe_for_event(a, EventKind::Custom(1)));
    assert!(bus.subscribe_for_event(b, EventKind::Custom(1)));

    bus.dispatch_event(message(EventKind::Custom(1), vec!["x".into()]));
    assert!(wait_until(Duration::from_secs(5), || {
        first.count() == 1 && second.count() == 1
    }));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 1);
}

#[test]
fn test_revoked_subscriber_receives_nothing() {
    let bus = EventBus::new(EventConfig::with_port(0));
    let collector = Collector::new();
    let subscriber: Arc<dyn EventSubscriber> = Arc::clone(&collector) as _;
    let id = bus.create_subscription(&subscriber).unwrap();
    assert!(bus.subscribe_for_event(id, EventKind::Custom(9)));

    bus.revoke_all_subscriptions(&subscriber);
    // The id is gone from the registry.
    assert!(!bus.subscribe_for_event(id, EventKind::Custom(9)));

    bus.dispatch_event(message(EventKind::Custom(9), vec![]));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(collector.count(), 0);
}

#[test]
fn test_revoke_single_subscription_keeps_others() {
    let bus = EventBus::new(EventConfig::with_port(0));
    let kept = Collector::new();
    let dropped = Collector::new();
    let kept_sub: Arc<dyn EventSubscriber> = Arc::clone(&kept) as _;
    let dropped_sub: Arc<dyn EventSubscriber> = Arc::clone(&dropped) as _;
    let keep_id = bus.create_subscription(&kept_sub).unwrap();
    let drop_id = bus.create_subscription(&dropped_sub).unwrap();
    assert!(bus.subscribe_for_event(keep_id, EventKind::Custom(4)));
    assert!(bus.subscribe_for_event(drop_id, EventKind::Custom(4)));

    bus.revoke_subscription(drop_id);
    bus.dispatch_event(message(EventKind::Custom(4), vec![]));
    assert!(wait_until(Duration::from_secs(5), || kept.count() == 1));
    assert_eq!(dropped.count(), 0);
}

#[test]
fn test_per_subscriber_fifo_under_concurrent_producers() {
    let bus = Arc::new(EventBus::new(EventConfig::with_port(0)));
    let collector = Collector::new();
    let subscriber: Arc<dyn EventSubscriber> = Arc::clone(&collector) as _;
    let id = bus.create_subscription(&subscriber).unwrap();
    assert!(bus.subscribe_for_event(id, EventKind::Custom(1)));

    let producers = 4;
    let per_producer = 250;
    let mut handles = Vec::new();
    for producer in 0..producers {
        let bus = Arc::clone(&bus);
        handles.push(thread::spawn(move || {
            for seq in 0..per_producer {
                bus.dispatch_event(message(
                    EventKind::Custom(1),
                    vec![producer.to_string(), seq.to_string()],
                ));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || {
        collector.count() == producers * per_producer
    }));

    // Each producer's messages arrive in its post order.
    let mut last_seen = vec![-1i64; producers];
    for msg in collector.snapshot() {
        let producer: usize = msg.subject[0].parse().unwrap();
        let seq: i64 = msg.subject[1].parse().unwrap();
        assert!(
            seq > last_seen[producer],
            "producer {producer} reordered: {seq} after {}",
            last_seen[producer]
        );
        last_seen[producer] = seq;
    }
}

#[test]
fn test_dropped_subscriber_is_pruned_at_dispatch() {
    let bus = EventBus::new(EventConfig::with_port(0));
    let collector = Collector::new();
    let subscriber: Arc<dyn EventSubscriber> = Arc::clone(&collector) as _;
    let id = bus.create_subscription(&subscriber).unwrap();
    assert!(bus.subscribe_for_event(id, EventKind::Custom(6)));

    // The owner vanishes without revoking.
    drop(subscriber);
    drop(collector);

    bus.dispatch_event(message(EventKind::Custom(6), vec![]));
    // The registration was removed outright, not just silenced.
    assert!(!bus.subscribe_for_event(id, EventKind::Custom(6)));
}

#[test]
fn test_idle_listener_accepts_promptly() {
    let bus = EventBus::new(EventConfig::with_port(0));
    assert!(bus.start());
    let port = bus.listen_port();
    // Let the accept loop go idle between polls.
    thread::sleep(Duration::from_millis(200));

    let start = Instant::now();
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let raw = "NOTIFY / HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
    stream.write_all(raw.as_bytes()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(
        start.elapsed() < Duration::from_millis(500),
        "notification waited {:?} in the accept backlog",
        start.elapsed()
    );
    bus.stop();
}

#[test]
fn test_bind_conflict_moves_to_next_port() {
    let occupier = TcpListener::bind("127.0.0.1:47400").expect("occupy port 47400");
    let bus = EventBus::new(EventConfig::with_port(47400));
    assert!(bus.start());
    assert!(bus.has_started());
    assert_eq!(bus.listen_port(), 47401);
    bus.stop();
    assert!(!bus.has_started());
    drop(occupier);
}

#[test]
fn test_bind_exhaustion_fails_and_announces_status() {
    let occupier = TcpListener::bind("127.0.0.1:47420").expect("occupy port 47420");
    let config = EventConfig {
        port: 47420,
        bind_retries: 1,
        ..EventConfig::default()
    };
    let bus = EventBus::new(config);
    let collector = Collector::new();
    let subscriber: Arc<dyn EventSubscriber> = Arc::clone(&collector) as _;
    let id = bus.create_subscription(&subscriber).unwrap();
    assert!(bus.subscribe_for_event(id, EventKind::HandlerStatus));

    assert!(!bus.start());
    assert!(wait_until(Duration::from_secs(5), || {
        collector
            .snapshot()
            .iter()
            .any(|m| m.subject.first().map(String::as_str) == Some(STATUS_FAILED))
    }));
    drop(occupier);
}

#[test]
fn test_notify_over_socket_reaches_subscriber() {
    let bus = EventBus::new(EventConfig::with_port(0));
    let collector = Collector::new();
    let subscriber: Arc<dyn EventSubscriber> = Arc::clone(&collector) as _;
    let id = bus.create_subscription(&subscriber).unwrap();
    assert!(bus.subscribe_for_event(id, EventKind::UpnpPropertyChange));
    assert!(bus.subscribe_for_event(id, EventKind::HandlerStatus));

    assert!(bus.start());
    let port = bus.listen_port();
    assert_ne!(port, 0);

    // The listener announces itself once it is accepting.
    assert!(wait_until(Duration::from_secs(5), || {
        collector
            .snapshot()
            .iter()
            .any(|m| m.subject.first().map(String::as_str) == Some(STATUS_STARTED))
    }));

    let body = "<e:propertyset><e:property><Volume>42</Volume></e:property></e:propertyset>";
    let request = format!(
        "NOTIFY / HTTP/1.1\r\nHOST: 127.0.0.1:{port}\r\nSID: uuid:wire-1\r\nSEQ: 3\r\n\
         NT: upnp:event\r\nNTS: upnp:propchange\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"));

    assert!(wait_until(Duration::from_secs(5), || {
        collector
            .snapshot()
            .iter()
            .any(|m| m.kind == EventKind::UpnpPropertyChange)
    }));
    let snapshot = collector.snapshot();
    let msg = snapshot
        .iter()
        .find(|m| m.kind == EventKind::UpnpPropertyChange)
        .unwrap();
    assert_eq!(msg.subject[0], "uuid:wire-1");
    assert_eq!(msg.subject[1], "3");
    assert_eq!(msg.subject[2], body);
    bus.stop();
}
