//! Topic publisher fanning out over bounded crossbeam channels.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::msgs::TransformStamped;

use super::{Publisher, TransformBroadcaster};

/// Receiving end of one topic subscription.
///
/// Derefs to the underlying [`Receiver`]. Dropping it unsubscribes.
pub struct Subscription<M> {
    rx: Receiver<M>,
    _alive: Arc<()>,
}

impl<M> Deref for Subscription<M> {
    type Target = Receiver<M>;

    fn deref(&self) -> &Receiver<M> {
        &self.rx
    }
}

struct Subscriber<M> {
    tx: Sender<M>,
    // Publisher-side handle on the same queue, used to evict the oldest message.
    rx: Receiver<M>,
    alive: Weak<()>,
}

/// One bounded queue per subscriber, `queue_size` messages deep.
///
/// A full queue evicts its oldest message to make room for the new one, so
/// a lagging subscriber always ends up with the latest `queue_size`
/// messages. Dropped subscriptions are pruned on the next publish.
pub struct ChannelPublisher<M> {
    topic: String,
    queue_size: AtomicUsize,
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M: Clone + Send> ChannelPublisher<M> {
    pub fn new(topic: impl Into<String>, queue_size: usize) -> Self {
        Self {
            topic: topic.into(),
            queue_size: AtomicUsize::new(queue_size.max(1)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Attach a new subscriber. Only messages published afterwards are received.
    pub fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = bounded(self.queue_size());
        let alive = Arc::new(());
        self.subscribers.lock().push(Subscriber {
            tx,
            rx: rx.clone(),
            alive: Arc::downgrade(&alive),
        });
        Subscription { rx, _alive: alive }
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::SeqCst)
    }

    /// Queue depth for subscribers attached from now on. Existing
    /// subscriptions keep their depth.
    pub fn set_queue_size(&self, queue_size: usize) {
        self.queue_size.store(queue_size.max(1), Ordering::SeqCst);
    }
}

impl<M: Clone + Send> Publisher<M> for ChannelPublisher<M> {
    fn publish(&self, msg: &M) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if sub.alive.strong_count() == 0 {
                debug!("Subscriber of '{}' disconnected", self.topic);
                return false;
            }
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(msg)) => {
                    let _ = sub.rx.try_recv();
                    debug!("Queue full on '{}', dropped oldest message", self.topic);
                    if sub.tx.try_send(msg).is_err() {
                        warn!("Queue full on '{}', dropping message", self.topic);
                    }
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
            true
        });
    }

    fn num_subscribers(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|sub| sub.alive.strong_count() > 0)
            .count()
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

impl TransformBroadcaster for ChannelPublisher<TransformStamped> {
    fn send_transform(&self, transform: &TransformStamped) {
        self.publish(transform);
    }
}
