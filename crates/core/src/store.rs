//! Sorted in-memory snapshot of one remote collection.

use std::{fmt, sync::Arc};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::debug;

use crate::{
    broadcast::{Broadcast, Snapshot},
    entity::Entity,
    sort::{self, SortDescriptor},
};

/// Thread-safe cache holding the current sorted snapshot of a collection.
///
/// [`CacheStore::set_snapshot`] is the only way the contents change; every
/// write sorts with the active descriptors and publishes exactly once through
/// the attached [`Broadcast`].
pub struct CacheStore<T> {
    broadcast: Arc<Broadcast<T>>,
    writer: ReentrantMutex<()>,
    inner: RwLock<Inner<T>>,
}

struct Inner<T> {
    snapshot: Snapshot<T>,
    descriptors: Vec<SortDescriptor>,
    version: u64,
}

impl<T: Entity> CacheStore<T> {
    /// Build an empty store publishing through `broadcast`.
    pub fn new(broadcast: Arc<Broadcast<T>>) -> Self {
        Self {
            broadcast,
            writer: ReentrantMutex::new(()),
            inner: RwLock::new(Inner {
                snapshot: Arc::new(Vec::new()),
                descriptors: Vec::new(),
                version: 0,
            }),
        }
    }

    /// Channel the store publishes to.
    pub fn broadcast(&self) -> &Arc<Broadcast<T>> {
        &self.broadcast
    }

    /// Current snapshot. Derive new sequences from it by copying.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.inner.read().snapshot.clone()
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.inner.read().snapshot.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of writes applied so far.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Active sort descriptors.
    pub fn sort_descriptors(&self) -> Vec<SortDescriptor> {
        self.inner.read().descriptors.clone()
    }

    /// Replace the sort descriptors. The current snapshot is re-sorted on the
    /// next write, not now.
    pub fn set_sort_descriptors(&self, descriptors: Vec<SortDescriptor>) {
        self.inner.write().descriptors = descriptors;
    }

    /// Sort `items`, store them as the snapshot and publish the result.
    pub fn set_snapshot(&self, items: Vec<T>) {
        let _writer = self.writer.lock();
        self.store_and_publish(items);
    }

    /// Compute the next snapshot from the current one and store it.
    ///
    /// Reading, computing and writing happen under the writer lock, so no other
    /// write can land between them.
    pub fn mutate<F>(&self, next: F)
    where
        F: FnOnce(&[T]) -> Vec<T>,
    {
        self.try_mutate(|current| Some(next(current)));
    }

    /// Like [`CacheStore::mutate`], but `next` may decline by returning `None`,
    /// in which case nothing is stored or published.
    ///
    /// Returns whether a new snapshot was written.
    pub fn try_mutate<F>(&self, next: F) -> bool
    where
        F: FnOnce(&[T]) -> Option<Vec<T>>,
    {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        match next(&current) {
            Some(items) => {
                self.store_and_publish(items);
                true
            }
            None => false,
        }
    }

    /// Clear the cache, publishing an empty snapshot.
    pub fn reset(&self) {
        self.set_snapshot(Vec::new());
    }

    fn store_and_publish(&self, items: Vec<T>) {
        let published = {
            let mut inner = self.inner.write();
            let sorted = if inner.descriptors.is_empty() {
                items
            } else {
                sort::sort(&items, &inner.descriptors)
            };
            inner.snapshot = Arc::new(sorted);
            inner.version += 1;
            debug!(
                len = inner.snapshot.len(),
                version = inner.version,
                "cache snapshot replaced"
            );
            inner.snapshot.clone()
        };
        self.broadcast.publish(published);
    }
}

impl<T> fmt::Debug for CacheStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("CacheStore")
            .field("len", &inner.snapshot.len())
            .field("version", &inner.version)
            .field("descriptors", &inner.descriptors)
            .finish()
    }
}
