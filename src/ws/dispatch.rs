//! Routing of inbound frames to the registered listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::traits::MessageListener;

/// Messages that may wait for the listener before new ones are dropped.
const DELIVERY_CAPACITY: usize = 1024;

/// Where an inbound frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Liveness reply; belongs to the heartbeat monitor
    Heartbeat,
    /// Handed to the delivery queue
    Queued,
    /// Dropped because delivery is paused, shut down, has no listener or is backed up
    Discarded,
}

#[derive(Default)]
struct Shared {
    paused: AtomicBool,
    closed: AtomicBool,
    listener: RwLock<Option<Arc<dyn MessageListener>>>,
}

impl Shared {
    fn listener(&self) -> Option<Arc<dyn MessageListener>> {
        // The slot is a plain replace-only Option, a poisoned lock holds no partial state
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_listener(&self, listener: Option<Arc<dyn MessageListener>>) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    fn accepts(&self) -> bool {
        !self.paused.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

/// Filters heartbeat replies, applies the pause flag and queues everything else for the
/// listener.
pub(crate) struct Dispatcher {
    heartbeat_payload: String,
    shared: Arc<Shared>,
    queue_tx: mpsc::Sender<String>,
}

impl Dispatcher {
    pub(crate) fn new(heartbeat_payload: String) -> (Self, DeliveryQueue) {
        Self::with_capacity(heartbeat_payload, DELIVERY_CAPACITY)
    }

    pub(crate) fn with_capacity(
        heartbeat_payload: String,
        capacity: usize,
    ) -> (Self, DeliveryQueue) {
        let shared = Arc::new(Shared::default());
        let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));

        let dispatcher = Self {
            heartbeat_payload,
            shared: Arc::clone(&shared),
            queue_tx,
        };

        (dispatcher, DeliveryQueue { shared, queue_rx })
    }

    pub(crate) fn route(&self, payload: String) -> Route {
        if payload == self.heartbeat_payload {
            return Route::Heartbeat;
        }

        if !self.shared.accepts() || self.shared.listener().is_none() {
            #[cfg(feature = "tracing")]
            tracing::trace!(%payload, "Discarding inbound message");
            return Route::Discarded;
        }

        match self.queue_tx.try_send(payload) {
            Ok(()) => Route::Queued,
            Err(TrySendError::Full(payload)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%payload, "Listener is falling behind, dropping inbound message");
                #[cfg(not(feature = "tracing"))]
                let _ = &payload;
                Route::Discarded
            }
            Err(TrySendError::Closed(_)) => Route::Discarded,
        }
    }

    pub(crate) fn set_listener(&self, listener: Arc<dyn MessageListener>) {
        self.shared.replace_listener(Some(listener));
    }

    pub(crate) fn clear_listener(&self) {
        self.shared.replace_listener(None);
    }

    pub(crate) fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub(crate) fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Stop delivering for good and release the listener.
    pub(crate) fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.replace_listener(None);
    }
}

/// Queue of application messages waiting for the listener.
///
/// Whoever drains the queue is the delivery context: listeners are always invoked from
/// there, one message at a time, in transport order. By default the client spawns a task
/// running [`DeliveryQueue::run`]; hosts with their own event loop obtain the queue from
/// [`Client::with_delivery_queue`](crate::Client::with_delivery_queue) and call
/// [`DeliveryQueue::deliver_pending`] from it.
///
/// The pause flag and the listener are checked again at delivery time, so messages queued
/// before a `pause` or `shutdown` are dropped instead of delivered late. The queue holds a
/// bounded number of messages; while it is full, new messages are dropped.
pub struct DeliveryQueue {
    shared: Arc<Shared>,
    queue_rx: mpsc::Receiver<String>,
}

impl DeliveryQueue {
    /// Deliver messages until the client is gone.
    pub async fn run(mut self) {
        while let Some(text) = self.queue_rx.recv().await {
            self.deliver(&text);
        }
    }

    /// Deliver everything already queued without waiting. Returns how many messages
    /// reached the listener.
    pub fn deliver_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(text) = self.queue_rx.try_recv() {
            if self.deliver(&text) {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(&self, text: &str) -> bool {
        if !self.shared.accepts() {
            return false;
        }

        match self.shared.listener() {
            Some(listener) => {
                listener.on_message_received(text);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn collecting() -> (Arc<Mutex<Vec<String>>>, Arc<dyn MessageListener>) {
        let received: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&received);
        let listener = move |text: &str| sink.lock().unwrap().push(text.to_owned());
        (received, Arc::new(listener))
    }

    #[test]
    fn heartbeat_reply_never_reaches_listener() {
        let (dispatcher, mut queue) = Dispatcher::new("ping".to_owned());
        let (received, listener) = collecting();
        dispatcher.set_listener(listener);

        assert_eq!(dispatcher.route("ping".to_owned()), Route::Heartbeat);
        assert_eq!(dispatcher.route("hello".to_owned()), Route::Queued);
        assert_eq!(queue.deliver_pending(), 1);

        assert_eq!(*received.lock().unwrap(), vec!["hello".to_owned()]);
    }

    #[test]
    fn paused_frames_are_discarded_not_buffered() {
        let (dispatcher, mut queue) = Dispatcher::new("ping".to_owned());
        let (received, listener) = collecting();
        dispatcher.set_listener(listener);

        dispatcher.pause();
        assert!(dispatcher.is_paused(), "pause flag should be set");
        assert_eq!(dispatcher.route("while paused".to_owned()), Route::Discarded);

        dispatcher.resume();
        assert_eq!(queue.deliver_pending(), 0);
        assert_eq!(dispatcher.route("after resume".to_owned()), Route::Queued);
        assert_eq!(queue.deliver_pending(), 1);

        assert_eq!(*received.lock().unwrap(), vec!["after resume".to_owned()]);
    }

    #[test]
    fn queued_frames_dropped_when_paused_before_delivery() {
        let (dispatcher, mut queue) = Dispatcher::new("ping".to_owned());
        let (received, listener) = collecting();
        dispatcher.set_listener(listener);

        assert_eq!(dispatcher.route("queued".to_owned()), Route::Queued);
        dispatcher.pause();

        assert_eq!(queue.deliver_pending(), 0);
        assert!(received.lock().unwrap().is_empty(), "paused delivery leaked");
    }

    #[test]
    fn missing_listener_discards_silently() {
        let (dispatcher, mut queue) = Dispatcher::new("ping".to_owned());

        assert_eq!(dispatcher.route("nobody home".to_owned()), Route::Discarded);

        let (received, listener) = collecting();
        dispatcher.set_listener(listener);
        assert_eq!(dispatcher.route("queued".to_owned()), Route::Queued);
        dispatcher.clear_listener();

        assert_eq!(queue.deliver_pending(), 0);
        assert!(received.lock().unwrap().is_empty(), "cleared listener was invoked");
    }

    #[test]
    fn full_queue_drops_new_frames() {
        let (dispatcher, mut queue) = Dispatcher::with_capacity("ping".to_owned(), 2);
        let (received, listener) = collecting();
        dispatcher.set_listener(listener);

        assert_eq!(dispatcher.route("a".to_owned()), Route::Queued);
        assert_eq!(dispatcher.route("b".to_owned()), Route::Queued);
        assert_eq!(dispatcher.route("c".to_owned()), Route::Discarded);
        // The sentinel never needs queue space
        assert_eq!(dispatcher.route("ping".to_owned()), Route::Heartbeat);

        assert_eq!(queue.deliver_pending(), 2);
        assert_eq!(dispatcher.route("d".to_owned()), Route::Queued);
        assert_eq!(queue.deliver_pending(), 1);

        assert_eq!(
            *received.lock().unwrap(),
            vec!["a".to_owned(), "b".to_owned(), "d".to_owned()]
        );
    }

    #[test]
    fn close_releases_listener() {
        let (dispatcher, mut queue) = Dispatcher::new("ping".to_owned());
        let (received, listener) = collecting();
        dispatcher.set_listener(Arc::clone(&listener));

        dispatcher.close();

        assert_eq!(Arc::strong_count(&listener), 1);
        assert_eq!(dispatcher.route("late".to_owned()), Route::Discarded);
        assert_eq!(queue.deliver_pending(), 0);
        assert!(received.lock().unwrap().is_empty(), "closed dispatcher delivered");
    }
}
