//! Replay-latest publish/subscribe for cache snapshots.

use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;
use tracing::trace;

/// Immutable, shared view of the cache contents.
///
/// A published snapshot is never modified; mutations build a new vector.
pub type Snapshot<T> = Arc<Vec<T>>;

type Observer<T> = Arc<dyn Fn(&Snapshot<T>) + Send + Sync>;

/// Handle identifying one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish/subscribe channel that replays its latest value to new subscribers.
///
/// Delivery is synchronous: [`Broadcast::publish`] returns only after every
/// observer registered at that moment has been called, in registration order.
/// Observers may call back into the channel (read, subscribe, unsubscribe)
/// from within a delivery on the same thread.
///
/// A publish made from inside an observer is queued and delivered once the
/// current round has reached every observer, so all observers see snapshots
/// in publish order.
pub struct Broadcast<T> {
    delivery: ReentrantMutex<()>,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    latest: Snapshot<T>,
    next_id: u64,
    observers: Vec<(SubscriptionId, Observer<T>)>,
    queued: VecDeque<Snapshot<T>>,
    delivering: bool,
}

impl<T> Broadcast<T> {
    /// Create a channel whose latest value is an empty snapshot.
    pub fn new() -> Self {
        Self {
            delivery: ReentrantMutex::new(()),
            inner: Mutex::new(Inner {
                latest: Arc::new(Vec::new()),
                next_id: 0,
                observers: Vec::new(),
                queued: VecDeque::new(),
                delivering: false,
            }),
        }
    }

    /// Most recently delivered snapshot.
    pub fn latest(&self) -> Snapshot<T> {
        self.inner.lock().latest.clone()
    }

    /// Number of currently registered observers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Register `observer`, immediately calling it with the latest snapshot.
    ///
    /// The observer then receives every later publish until it is passed to
    /// [`Broadcast::unsubscribe`].
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        let _delivery = self.delivery.lock();
        let observer: Observer<T> = Arc::new(observer);
        let (id, latest) = {
            let mut inner = self.inner.lock();
            let id = SubscriptionId(inner.next_id);
            inner.next_id += 1;
            inner.observers.push((id, observer.clone()));
            (id, inner.latest.clone())
        };
        trace!(subscription = id.0, len = latest.len(), "replaying latest snapshot");
        observer(&latest);
        id
    }

    /// Stop deliveries to the observer behind `id`. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let _delivery = self.delivery.lock();
        self.inner
            .lock()
            .observers
            .retain(|(registered, _)| *registered != id);
    }

    /// Store `snapshot` as the latest value and deliver it to every observer.
    ///
    /// Called from inside an observer, the snapshot is queued behind the round
    /// in progress and this returns before it is delivered.
    pub fn publish(&self, snapshot: Snapshot<T>) {
        let _delivery = self.delivery.lock();
        {
            let mut inner = self.inner.lock();
            inner.queued.push_back(snapshot);
            if inner.delivering {
                trace!(queued = inner.queued.len(), "publish queued behind delivery");
                return;
            }
            inner.delivering = true;
        }
        while let Some((snapshot, observers)) = self.next_round() {
            self.deliver(&snapshot, observers);
        }
    }

    fn next_round(&self) -> Option<(Snapshot<T>, Vec<(SubscriptionId, Observer<T>)>)> {
        let mut inner = self.inner.lock();
        match inner.queued.pop_front() {
            Some(snapshot) => {
                inner.latest = snapshot.clone();
                Some((snapshot, inner.observers.clone()))
            }
            None => {
                inner.delivering = false;
                None
            }
        }
    }

    fn deliver(&self, snapshot: &Snapshot<T>, observers: Vec<(SubscriptionId, Observer<T>)>) {
        trace!(
            observers = observers.len(),
            len = snapshot.len(),
            "publishing snapshot"
        );
        for (id, observer) in observers {
            // An earlier observer in this round may have unsubscribed this one.
            if self.is_registered(id) {
                observer(snapshot);
            }
        }
    }

    fn is_registered(&self, id: SubscriptionId) -> bool {
        self.inner
            .lock()
            .observers
            .iter()
            .any(|(registered, _)| *registered == id)
    }
}

impl<T: Send + Sync + 'static> Broadcast<T> {
    /// Subscribe through an unbounded tokio channel.
    ///
    /// The replayed snapshot is already queued when this returns. Dropping the
    /// receiver does not unregister the observer; pass the returned id to
    /// [`Broadcast::unsubscribe`].
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Snapshot<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |snapshot: &Snapshot<T>| {
            let _ = tx.send(snapshot.clone());
        });
        (id, rx)
    }
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Broadcast")
            .field("latest_len", &inner.latest.len())
            .field("subscribers", &inner.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (
        Arc<Mutex<Vec<Vec<u32>>>>,
        impl Fn(&Snapshot<u32>) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |snapshot: &Snapshot<u32>| {
            sink.lock().push(snapshot.to_vec())
        })
    }

    #[test]
    fn replays_empty_snapshot_before_first_publish() {
        let channel = Broadcast::<u32>::new();
        let (seen, observer) = recorder();
        channel.subscribe(observer);
        assert_eq!(*seen.lock(), vec![Vec::<u32>::new()]);
    }

    #[test]
    fn late_subscriber_gets_latest_then_every_publish_in_order() {
        let channel = Broadcast::new();
        channel.publish(Arc::new(vec![1]));
        channel.publish(Arc::new(vec![1, 2]));

        let (seen, observer) = recorder();
        channel.subscribe(observer);
        assert_eq!(*seen.lock(), vec![vec![1, 2]]);

        channel.publish(Arc::new(vec![3]));
        channel.publish(Arc::new(vec![]));
        assert_eq!(*seen.lock(), vec![vec![1, 2], vec![3], vec![]]);
    }

    #[test]
    fn delivers_in_registration_order() {
        let channel = Broadcast::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            channel.subscribe(move |_: &Snapshot<u32>| order.lock().push(tag));
        }
        order.lock().clear();
        channel.publish(Arc::new(vec![7]));
        assert_eq!(*order.lock(), ["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let channel = Broadcast::new();
        let (seen, observer) = recorder();
        let id = channel.subscribe(observer);
        channel.publish(Arc::new(vec![1]));
        channel.unsubscribe(id);
        channel.unsubscribe(id);
        channel.publish(Arc::new(vec![2]));
        assert_eq!(*seen.lock(), vec![vec![], vec![1]]);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn observer_may_unsubscribe_itself_during_delivery() {
        let channel = Arc::new(Broadcast::<u32>::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let id = {
            let inner_channel = channel.clone();
            let slot = slot.clone();
            let calls = calls.clone();
            channel.subscribe(move |snapshot: &Snapshot<u32>| {
                *calls.lock() += 1;
                if !snapshot.is_empty() {
                    if let Some(id) = *slot.lock() {
                        inner_channel.unsubscribe(id);
                    }
                }
            })
        };
        *slot.lock() = Some(id);

        channel.publish(Arc::new(vec![1]));
        channel.publish(Arc::new(vec![2]));
        assert_eq!(*calls.lock(), 2);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn publish_from_an_observer_waits_for_the_current_round() {
        let channel = Arc::new(Broadcast::<u32>::new());
        {
            let inner_channel = channel.clone();
            channel.subscribe(move |snapshot: &Snapshot<u32>| {
                if snapshot.as_slice() == [1] {
                    inner_channel.publish(Arc::new(vec![1, 2]));
                }
            });
        }
        let (seen, observer) = recorder();
        channel.subscribe(observer);

        channel.publish(Arc::new(vec![1]));

        assert_eq!(*seen.lock(), vec![vec![], vec![1], vec![1, 2]]);
        assert_eq!(channel.latest().to_vec(), vec![1, 2]);
    }

    #[tokio::test]
    async fn channel_subscription_queues_replay_and_updates() {
        let channel = Broadcast::new();
        channel.publish(Arc::new(vec![5]));
        let (id, mut rx) = channel.subscribe_channel();
        channel.publish(Arc::new(vec![5, 6]));
        channel.unsubscribe(id);
        channel.publish(Arc::new(vec![]));

        assert_eq!(rx.recv().await.map(|s| s.to_vec()), Some(vec![5]));
        assert_eq!(rx.recv().await.map(|s| s.to_vec()), Some(vec![5, 6]));
        assert!(rx.try_recv().is_err());
    }
}
