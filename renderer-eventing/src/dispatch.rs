//! Per-subscriber dispatch threads.

use crate::message::{EventMessagePtr, SubscriptionId};
use crate::subscriber::EventSubscriber;
use renderer_sync::{Counter, Event, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{debug, warn};

struct DispatchShared {
    queue: Mutex<VecDeque<EventMessagePtr>>,
    queue_content: Event,
    stop: Counter,
    subscriber: Weak<dyn EventSubscriber>,
}

/// One dedicated thread and private FIFO per registered subscriber.
///
/// Decouples "a notification arrived" from "the subscriber finished
/// processing it": the bus posts and returns, the thread drains. Messages
/// are delivered in post order; a callback that never returns stalls only
/// this thread.
pub(crate) struct SubscriberDispatchThread {
    id: SubscriptionId,
    shared: Arc<DispatchShared>,
    handle: Option<JoinHandle<()>>,
}

impl SubscriberDispatchThread {
    /// Spawn the dispatch thread. Fails only when the OS refuses a thread.
    pub(crate) fn spawn(
        id: SubscriptionId,
        subscriber: Weak<dyn EventSubscriber>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(DispatchShared {
            queue: Mutex::new(VecDeque::new()),
            queue_content: Event::new(),
            stop: Counter::new(0),
            subscriber,
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("dispatch-{id}"))
            .spawn(move || dispatch_main(id, thread_shared))?;
        debug!("dispatch thread started ({id})");
        Ok(Self {
            id,
            shared,
            handle: Some(handle),
        })
    }

    /// The registered subscriber, for identity comparisons.
    pub(crate) fn subscriber(&self) -> &Weak<dyn EventSubscriber> {
        &self.shared.subscriber
    }

    /// Whether the subscriber behind the weak reference still exists.
    pub(crate) fn is_live(&self) -> bool {
        self.shared.subscriber.strong_count() > 0
    }

    /// Append a message and wake the thread.
    pub(crate) fn post_message(&self, message: EventMessagePtr) {
        self.shared.queue.lock().push_back(message);
        self.shared.queue_content.signal();
    }

    /// Signal the thread even when its queue is empty, then join it.
    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.stop.store(1);
            self.shared.queue_content.signal();
            if handle.join().is_err() {
                warn!("dispatch thread panicked ({})", self.id);
            }
            debug!("dispatch thread stopped ({})", self.id);
        }
    }
}

impl Drop for SubscriberDispatchThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_main(id: SubscriptionId, shared: Arc<DispatchShared>) {
    while shared.stop.load() == 0 {
        loop {
            let message = shared.queue.lock().pop_front();
            let Some(message) = message else { break };
            let Some(subscriber) = shared.subscriber.upgrade() else {
                // Owner dropped without revoking; nothing left to deliver to.
                debug!("subscriber gone, dropping message ({id})");
                return;
            };
            subscriber.handle_event_message(message);
            if shared.stop.load() != 0 {
                return;
            }
        }
        shared.queue_content.wait();
    }
}
