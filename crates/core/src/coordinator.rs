//! CRUD operations that keep a [`CacheStore`] in step with a remote collection.
//!
//! Each operation awaits its [`Transport`] call, then applies one cache
//! policy:
//!
//! | operation       | on success                                   |
//! |-----------------|----------------------------------------------|
//! | `list`          | replace the whole snapshot                   |
//! | `create`        | append the returned entity                   |
//! | `retrieve_item` | replace the entity with the same id, else append |
//! | `update`/`patch`| replace the entity with the same id, if cached |
//! | `delete`        | drop every entity with the id                |
//!
//! A failed call returns before the cache is touched, so nothing is published.
//!
//! Operations are not serialized against each other. Each one computes its
//! write from the snapshot current when its response arrives, but a response
//! that was requested earlier can still land later: a slow `list` finishing
//! after a `create` replaces the snapshot without the created entity.

use std::{fmt, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    broadcast::{Broadcast, Snapshot, SubscriptionId},
    entity::Entity,
    error::{CrudError, CrudResult, TransportError},
    sort::SortDescriptor,
    store::CacheStore,
    transport::Transport,
    url::{PathParams, UrlResolver},
};

/// Keeps a sorted cache of `T` synchronised with CRUD calls to a remote endpoint.
pub struct CrudCoordinator<T> {
    store: Arc<CacheStore<T>>,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn UrlResolver>,
}

impl<T> Clone for CrudCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            transport: self.transport.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl<T: Entity> CrudCoordinator<T> {
    /// Assemble a coordinator from its collaborators.
    pub fn new(
        store: Arc<CacheStore<T>>,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn UrlResolver>,
    ) -> Self {
        Self {
            store,
            transport,
            resolver,
        }
    }

    /// Coordinator over a fresh, empty cache with its own broadcast channel.
    pub fn with_new_cache(transport: Arc<dyn Transport>, resolver: Arc<dyn UrlResolver>) -> Self {
        let store = Arc::new(CacheStore::new(Arc::new(Broadcast::new())));
        Self::new(store, transport, resolver)
    }

    /// Underlying cache.
    pub fn store(&self) -> &Arc<CacheStore<T>> {
        &self.store
    }

    /// Build the URL for `params` with the injected resolver.
    pub fn resolve_url(&self, params: &PathParams) -> String {
        self.resolver.resolve(params)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.store.snapshot()
    }

    /// Active sort descriptors.
    pub fn sort_descriptors(&self) -> Vec<SortDescriptor> {
        self.store.sort_descriptors()
    }

    /// Replace the sort descriptors; applied on the next mutation.
    pub fn set_sort_descriptors(&self, descriptors: Vec<SortDescriptor>) {
        self.store.set_sort_descriptors(descriptors);
    }

    /// Observe snapshots; the latest one is delivered before this returns.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        self.store.broadcast().subscribe(observer)
    }

    /// Observe snapshots through a tokio channel.
    pub fn subscribe_channel(
        &self,
    ) -> (
        SubscriptionId,
        tokio::sync::mpsc::UnboundedReceiver<Snapshot<T>>,
    ) {
        self.store.broadcast().subscribe_channel()
    }

    /// Stop an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.store.broadcast().unsubscribe(id);
    }

    /// Fetch the collection at `url` and replace the cache with it.
    pub async fn list(&self, url: &str) -> CrudResult<Vec<T>> {
        let payload = self
            .transport
            .get(url)
            .await
            .map_err(|err| failed("list", url, err))?;
        let items: Vec<T> = decode("list", url, payload)?;
        debug!(url, count = items.len(), "listed collection");
        self.store.set_snapshot(items.clone());
        Ok(items)
    }

    /// Create a resource and append the returned entity to the cache.
    pub async fn create<P>(&self, url: &str, payload: &P) -> CrudResult<T>
    where
        P: Serialize + ?Sized,
    {
        let body = serde_json::to_value(payload)?;
        let response = self
            .transport
            .post(url, body)
            .await
            .map_err(|err| failed("create", url, err))?;
        let created: T = decode("create", url, response)?;
        debug!(url, id = ?created.id(), "created entity");
        let appended = created.clone();
        self.store.mutate(move |current| {
            let mut next = current.to_vec();
            next.push(appended);
            next
        });
        Ok(created)
    }

    /// Fetch one resource and upsert it into the cache.
    pub async fn retrieve_item(&self, url: &str) -> CrudResult<T> {
        let payload = self
            .transport
            .get(url)
            .await
            .map_err(|err| failed("retrieve_item", url, err))?;
        let fetched: T = decode("retrieve_item", url, payload)?;
        debug!(url, id = ?fetched.id(), "retrieved entity");
        let upserted = fetched.clone();
        self.store.mutate(move |current| {
            let mut next = current.to_vec();
            match next.iter().position(|item| item.id() == upserted.id()) {
                Some(index) => next[index] = upserted,
                None => next.push(upserted),
            }
            next
        });
        Ok(fetched)
    }

    /// Replace a resource with `entity` and refresh its cached copy.
    ///
    /// When the entity is not cached the cache is left alone.
    pub async fn update(&self, url: &str, entity: &T) -> CrudResult<T> {
        let body = serde_json::to_value(entity)?;
        let response = self
            .transport
            .put(url, body)
            .await
            .map_err(|err| failed("update", url, err))?;
        let updated: T = decode("update", url, response)?;
        self.replace_if_cached(url, &updated);
        Ok(updated)
    }

    /// Apply a partial update and refresh the cached copy, if any.
    pub async fn patch<P>(&self, url: &str, partial: &P) -> CrudResult<T>
    where
        P: Serialize + ?Sized,
    {
        let body = serde_json::to_value(partial)?;
        let response = self
            .transport
            .patch(url, body)
            .await
            .map_err(|err| failed("patch", url, err))?;
        let patched: T = decode("patch", url, response)?;
        self.replace_if_cached(url, &patched);
        Ok(patched)
    }

    /// Delete a resource and drop every cached entity with `id`.
    pub async fn delete(&self, url: &str, id: &T::Id) -> CrudResult<()> {
        self.transport
            .delete(url)
            .await
            .map_err(|err| failed("delete", url, err))?;
        debug!(url, ?id, "deleted entity");
        self.store.mutate(|current| {
            current
                .iter()
                .filter(|item| item.id() != id)
                .cloned()
                .collect()
        });
        Ok(())
    }

    /// Empty the cache and publish the empty snapshot.
    pub fn clean(&self) {
        debug!("cleaning cache");
        self.store.reset();
    }

    fn replace_if_cached(&self, url: &str, replacement: &T) {
        let replaced = self.store.try_mutate(|current| {
            let index = current
                .iter()
                .position(|item| item.id() == replacement.id())?;
            let mut next = current.to_vec();
            next[index] = replacement.clone();
            Some(next)
        });
        if replaced {
            debug!(url, id = ?replacement.id(), "replaced cached entity");
        } else {
            debug!(url, id = ?replacement.id(), "entity not cached; cache left unchanged");
        }
    }
}

impl<T> fmt::Debug for CrudCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudCoordinator")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn failed(operation: &'static str, url: &str, err: TransportError) -> TransportError {
    warn!(operation, url, error = %err, "transport call failed; cache unchanged");
    err
}

fn decode<V>(operation: &'static str, url: &str, payload: Value) -> CrudResult<V>
where
    V: DeserializeOwned,
{
    serde_json::from_value(payload).map_err(|err| {
        warn!(operation, url, error = %err, "undecodable response; cache unchanged");
        CrudError::Serde(err)
    })
}
