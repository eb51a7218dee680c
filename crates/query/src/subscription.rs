use crate::cache::{Fetcher, QueryCache};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::options::QueryOptions;
use crate::state::QueryState;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

/// Live interest in one cache entry.
///
/// While at least one subscription to a key exists the entry is "active":
/// it is refetched on invalidation, focus and reconnect, and never garbage
/// collected. Dropping the subscription releases that interest.
pub struct Subscription<T, E: Send + Sync + 'static> {
    cache: QueryCache<E>,
    key: QueryKey,
    fetcher: Fetcher<E>,
    options: QueryOptions,
    receiver: watch::Receiver<u64>,
    _data: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static, E: Send + Sync + 'static> Subscription<T, E> {
    pub(crate) fn new(
        cache: QueryCache<E>,
        key: QueryKey,
        fetcher: Fetcher<E>,
        options: QueryOptions,
        receiver: watch::Receiver<u64>,
    ) -> Self {
        Self { cache, key, fetcher, options, receiver, _data: PhantomData }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState<T, E> {
        self.cache.state(&self.key)
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.cache.get_data(&self.key)
    }

    /// Wait for the fetch in flight (if any) and return the resulting state.
    pub async fn settled(&self) -> QueryState<T, E> {
        if let Some(fetch) = self.cache.in_flight(&self.key) {
            let _ = fetch.await;
        }
        self.state()
    }

    /// Wait for the entry to change and return the new state.
    pub async fn changed(&mut self) -> QueryState<T, E> {
        if self.receiver.changed().await.is_err() {
            // Entry was removed; follow its replacement if there is one.
            if let Some(receiver) = self.cache.receiver(&self.key) {
                self.receiver = receiver;
            }
        }
        self.state()
    }

    /// Fetch now, joining a fetch already in flight.
    pub async fn refetch(&self) -> Result<Arc<T>, QueryError<E>> {
        self.cache.reattach(&self.key, &self.fetcher, self.options);
        let fetch = self.cache.start_fetch(&self.key, false, None).ok_or(QueryError::Cancelled)?;
        let data = fetch.await?;
        data.downcast::<T>().map_err(|_| QueryError::TypeMismatch { key: self.key.clone() })
    }
}

impl<T, E: Send + Sync + 'static> Drop for Subscription<T, E> {
    fn drop(&mut self) {
        self.cache.unsubscribe(&self.key);
    }
}
