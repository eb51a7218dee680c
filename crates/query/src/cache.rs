use crate::error::QueryError;
use crate::key::QueryKey;
use crate::options::{QueryOptions, RetryPolicy};
use crate::state::{QueryState, QueryStatus};
use crate::subscription::Subscription;
use futures::FutureExt;
use futures::future::{AbortHandle, BoxFuture, Shared, abortable, join_all};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;

pub(crate) type AnyData = Arc<dyn Any + Send + Sync>;
pub(crate) type Fetcher<E> = Arc<dyn Fn() -> BoxFuture<'static, Result<AnyData, E>> + Send + Sync>;
pub(crate) type SharedFetch<E> = Shared<BoxFuture<'static, Result<AnyData, QueryError<E>>>>;
type RetryFilter<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Which invalidated entries to refetch straight away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchType {
    /// Entries with at least one subscriber
    Active,
    /// Every entry that knows how to fetch itself
    All,
    /// None; entries refetch on their next access
    None,
}

struct InFlight<E> {
    generation: u64,
    shared: SharedFetch<E>,
    abort: AbortHandle,
}

struct Entry<E> {
    status: QueryStatus,
    data: Option<AnyData>,
    error: Option<QueryError<E>>,
    fetched_at: Option<Instant>,
    invalidated: bool,
    failure_count: u32,
    options: QueryOptions,
    fetcher: Option<Fetcher<E>>,
    subscribers: usize,
    idle_since: Option<Instant>,
    /// Bumped for every fetch started and every fetch disowned; a result only
    /// lands if its generation is still current.
    generation: u64,
    in_flight: Option<InFlight<E>>,
    version: watch::Sender<u64>,
}

impl<E> Entry<E> {
    fn new(options: QueryOptions) -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            invalidated: false,
            failure_count: 0,
            options,
            fetcher: None,
            subscribers: 0,
            idle_since: Some(Instant::now()),
            generation: 0,
            in_flight: None,
            version: watch::channel(0).0,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.invalidated || self.fetched_at.is_none_or(|at| now.saturating_duration_since(at) >= self.options.stale_time)
    }

    fn notify(&self) {
        self.version.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Abort the in-flight fetch and make sure its result never lands.
    fn disown(&mut self) -> bool {
        let Some(in_flight) = self.in_flight.take() else { return false };
        in_flight.abort.abort();
        self.generation += 1;
        self.status = if self.data.is_some() { QueryStatus::Success } else { QueryStatus::Idle };
        self.notify();
        true
    }

    fn snapshot<T: Any + Send + Sync>(&self, key: &QueryKey, now: Instant) -> QueryState<T, E> {
        let mut state = QueryState {
            status: self.status,
            data: None,
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            is_stale: self.is_stale(now),
            is_fetching: self.in_flight.is_some(),
            failure_count: self.failure_count,
        };
        if let Some(data) = &self.data {
            match Arc::clone(data).downcast::<T>() {
                Ok(data) => state.data = Some(data),
                Err(_) => {
                    state.status = QueryStatus::Error;
                    state.error = Some(QueryError::TypeMismatch { key: key.clone() });
                },
            }
        }
        state
    }
}

/// Keyed cache of asynchronously fetched values.
///
/// Values of any type live side by side; each key is read back with the type
/// it was stored with. For every key at most one fetch is in flight, and
/// concurrent callers join it. Cloning is cheap; clones share all entries.
pub struct QueryCache<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for QueryCache<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

pub(crate) struct WeakQueryCache<E> {
    inner: Weak<Inner<E>>,
}

impl<E> WeakQueryCache<E> {
    pub(crate) fn upgrade(&self) -> Option<QueryCache<E>> {
        self.inner.upgrade().map(|inner| QueryCache { inner })
    }
}

struct Inner<E> {
    entries: Mutex<HashMap<QueryKey, Entry<E>>>,
    defaults: QueryOptions,
    retry_if: Option<RetryFilter<E>>,
}

impl<E: Send + Sync + 'static> Inner<E> {
    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry<E>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn should_retry(&self, error: &E) -> bool {
        self.retry_if.as_ref().is_none_or(|filter| filter(error))
    }

    fn record_failure(&self, key: &QueryKey, generation: u64, failures: u32) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key)
            && entry.generation == generation
        {
            entry.failure_count = failures;
            entry.notify();
        }
    }

    fn commit(self: &Arc<Self>, key: &QueryKey, generation: u64, outcome: Result<AnyData, QueryError<E>>) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else { return };
        if entry.generation != generation {
            tracing::debug!(%key, "discarding result of a disowned fetch");
            return;
        }
        entry.in_flight = None;
        match outcome {
            Ok(data) => {
                entry.status = QueryStatus::Success;
                entry.data = Some(data);
                entry.error = None;
                entry.fetched_at = Some(Instant::now());
                entry.invalidated = false;
                entry.failure_count = 0;
            },
            Err(error) => {
                tracing::debug!(%key, attempts = error.attempts(), "query failed");
                entry.status = QueryStatus::Error;
                entry.failure_count = error.attempts();
                entry.error = Some(error);
            },
        }
        entry.notify();
        let idle = (entry.subscribers == 0).then(|| {
            entry.idle_since = Some(Instant::now());
            entry.options.gc_time
        });
        drop(entries);
        if let Some(gc_time) = idle {
            self.schedule_gc(key, gc_time);
        }
    }

    /// Try to collect `key` once `gc_time` has passed.
    fn schedule_gc(self: &Arc<Self>, key: &QueryKey, gc_time: Duration) {
        let Ok(runtime) = Handle::try_current() else { return };
        let inner = Arc::downgrade(self);
        let key = key.clone();
        runtime.spawn(async move {
            tokio::time::sleep(gc_time).await;
            if let Some(inner) = inner.upgrade() {
                inner.collect(&key, Instant::now());
            }
        });
    }

    /// Drop `key` if it has been idle for its whole GC time.
    fn collect(&self, key: &QueryKey, now: Instant) -> bool {
        let mut entries = self.lock();
        let expired = entries.get(key).is_some_and(|entry| {
            entry.subscribers == 0
                && entry.in_flight.is_none()
                && entry.idle_since.is_some_and(|since| now.saturating_duration_since(since) >= entry.options.gc_time)
        });
        if expired {
            entries.remove(key);
            tracing::trace!(%key, "garbage collected");
        }
        expired
    }

    async fn run(
        this: Weak<Self>,
        key: QueryKey,
        generation: u64,
        fetcher: Fetcher<E>,
        retry: RetryPolicy,
    ) -> Result<AnyData, QueryError<E>> {
        let mut failures = 0;
        loop {
            match fetcher().await {
                Ok(data) => {
                    if let Some(this) = this.upgrade() {
                        this.commit(&key, generation, Ok(Arc::clone(&data)));
                    }
                    return Ok(data);
                },
                Err(error) => {
                    failures += 1;
                    let retry_allowed =
                        failures <= retry.attempts && this.upgrade().is_some_and(|this| this.should_retry(&error));
                    if retry_allowed {
                        if let Some(this) = this.upgrade() {
                            this.record_failure(&key, generation, failures);
                        }
                        let delay = retry.delay(failures);
                        tracing::debug!(%key, failures, ?delay, "fetch failed; retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let error = QueryError::Failed { error: Arc::new(error), attempts: failures };
                    if let Some(this) = this.upgrade() {
                        this.commit(&key, generation, Err(error.clone()));
                    }
                    return Err(error);
                },
            }
        }
    }
}

impl<E: Send + Sync + 'static> QueryCache<E> {
    pub fn new(defaults: QueryOptions) -> Self {
        Self::build(defaults, None)
    }

    /// Cache that only retries failures `filter` approves of.
    pub fn with_retry_filter(defaults: QueryOptions, filter: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self::build(defaults, Some(Arc::new(filter)))
    }

    fn build(defaults: QueryOptions, retry_if: Option<RetryFilter<E>>) -> Self {
        Self { inner: Arc::new(Inner { entries: Mutex::new(HashMap::new()), defaults, retry_if }) }
    }

    /// Handle that doesn't keep the cache alive, for fetchers stored inside it.
    pub(crate) fn downgrade(&self) -> WeakQueryCache<E> {
        WeakQueryCache { inner: Arc::downgrade(&self.inner) }
    }

    /// Options used for entries created without explicit ones.
    pub fn defaults(&self) -> QueryOptions {
        self.inner.defaults
    }

    pub(crate) fn erase<T, F, Fut>(fetcher: F) -> Fetcher<E>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Arc::new(move || {
            let fetch = fetcher();
            async move { fetch.await.map(|value| Arc::new(value) as AnyData) }.boxed()
        })
    }

    /// Register interest in `key`.
    ///
    /// Starts a fetch when the entry has no data, is stale or was invalidated,
    /// unless the query is disabled or a fetch is already in flight (which
    /// the subscription then shares).
    pub fn subscribe<T, F, Fut>(&self, key: QueryKey, fetcher: F, options: QueryOptions) -> Subscription<T, E>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let fetcher = Self::erase(fetcher);
        let receiver = self.register(&key, &fetcher, options, true);
        let fresh_enough = {
            let entries = self.inner.lock();
            entries.get(&key).is_none_or(|entry| {
                !entry.options.enabled
                    || entry.in_flight.is_some()
                    || (entry.data.is_some() && !entry.is_stale(Instant::now()))
            })
        };
        if !fresh_enough {
            self.start_fetch(&key, false, None);
        }
        Subscription::new(self.clone(), key, fetcher, options, receiver)
    }

    /// Record `fetcher` and `options` for `key`, creating the entry if needed.
    pub(crate) fn register(
        &self,
        key: &QueryKey,
        fetcher: &Fetcher<E>,
        options: QueryOptions,
        subscribe: bool,
    ) -> watch::Receiver<u64> {
        let (receiver, idle) = {
            let mut entries = self.inner.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(options));
            entry.fetcher = Some(Arc::clone(fetcher));
            entry.options = options;
            if subscribe {
                entry.subscribers += 1;
                entry.idle_since = None;
            } else if entry.subscribers == 0 {
                entry.idle_since = Some(Instant::now());
            }
            (entry.version.subscribe(), entry.subscribers == 0)
        };
        if idle {
            self.schedule_gc(key, options.gc_time);
        }
        receiver
    }

    /// Re-create `key` for a subscriber whose entry was removed underneath it.
    pub(crate) fn reattach(&self, key: &QueryKey, fetcher: &Fetcher<E>, options: QueryOptions) {
        let mut entries = self.inner.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| {
            let mut entry = Entry::new(options);
            entry.subscribers = 1;
            entry.idle_since = None;
            entry
        });
        if entry.fetcher.is_none() {
            entry.fetcher = Some(Arc::clone(fetcher));
        }
    }

    pub(crate) fn unsubscribe(&self, key: &QueryKey) {
        let gc_time = {
            let mut entries = self.inner.lock();
            let Some(entry) = entries.get_mut(key) else { return };
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers > 0 {
                return;
            }
            entry.idle_since = Some(Instant::now());
            entry.options.gc_time
        };
        self.schedule_gc(key, gc_time);
    }

    fn schedule_gc(&self, key: &QueryKey, gc_time: Duration) {
        self.inner.schedule_gc(key, gc_time);
    }

    /// Start a fetch for `key`, or join the one in flight.
    ///
    /// With `restart`, an in-flight fetch is disowned and a new one started.
    /// `fetcher` overrides the entry's registered fetcher for this fetch only.
    pub(crate) fn start_fetch(
        &self,
        key: &QueryKey,
        restart: bool,
        fetcher: Option<Fetcher<E>>,
    ) -> Option<SharedFetch<E>> {
        let shared = {
            let mut entries = self.inner.lock();
            let entry = entries.get_mut(key)?;
            if restart {
                entry.disown();
            } else if let Some(in_flight) = &entry.in_flight {
                return Some(in_flight.shared.clone());
            }
            let fetcher = fetcher.or_else(|| entry.fetcher.clone())?;
            entry.generation += 1;
            let generation = entry.generation;
            if entry.data.is_none() {
                entry.status = QueryStatus::Pending;
            }
            entry.failure_count = 0;
            let run = Inner::run(Arc::downgrade(&self.inner), key.clone(), generation, fetcher, entry.options.retry);
            let (run, abort) = abortable(run);
            let shared = async move { run.await.unwrap_or(Err(QueryError::Cancelled)) }.boxed().shared();
            entry.in_flight = Some(InFlight { generation, shared: shared.clone(), abort });
            entry.notify();
            tracing::debug!(%key, generation, "fetch started");
            shared
        };
        // Drive the fetch to completion even if every caller stops waiting.
        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(shared.clone().map(|_| ()));
        }
        Some(shared)
    }

    pub(crate) fn in_flight(&self, key: &QueryKey) -> Option<SharedFetch<E>> {
        let entries = self.inner.lock();
        entries.get(key)?.in_flight.as_ref().map(|in_flight| in_flight.shared.clone())
    }

    pub(crate) fn receiver(&self, key: &QueryKey) -> Option<watch::Receiver<u64>> {
        self.inner.lock().get(key).map(|entry| entry.version.subscribe())
    }

    /// Fetch `key` now regardless of staleness, joining a fetch already in
    /// flight.
    pub async fn fetch_now<T, F, Fut>(&self, key: QueryKey, fetcher: F, options: QueryOptions) -> Result<Arc<T>, QueryError<E>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let fetcher = Self::erase(fetcher);
        self.register(&key, &fetcher, options, false);
        let shared = self.start_fetch(&key, false, None).ok_or(QueryError::Cancelled)?;
        let data = shared.await?;
        data.downcast::<T>().map_err(|_| QueryError::TypeMismatch { key })
    }

    /// Mark every entry under `prefix` stale and refetch according to
    /// `refetch`.
    ///
    /// Marking and starting fetches happen immediately; the returned future
    /// only waits for those fetches to settle. In-flight fetches of refetched
    /// entries are disowned, so data from before the invalidation can't land.
    pub fn invalidate(&self, prefix: &QueryKey, refetch: RefetchType) -> impl Future<Output = ()> + Send + use<E> {
        let targets: Vec<QueryKey> = {
            let mut entries = self.inner.lock();
            let mut targets = Vec::new();
            for (key, entry) in entries.iter_mut().filter(|(key, _)| key.starts_with(prefix)) {
                entry.invalidated = true;
                entry.notify();
                let wanted = match refetch {
                    RefetchType::Active => entry.subscribers > 0,
                    RefetchType::All => true,
                    RefetchType::None => false,
                };
                if wanted && entry.options.enabled && entry.fetcher.is_some() {
                    targets.push(key.clone());
                }
            }
            targets
        };
        tracing::debug!(%prefix, refetching = targets.len(), "invalidated");
        let fetches: Vec<_> = targets.iter().filter_map(|key| self.start_fetch(key, true, None)).collect();
        async move {
            join_all(fetches).await;
        }
    }

    /// Overwrite the data for `key` locally, creating the entry if needed.
    pub fn set_data<T: Send + Sync + 'static>(&self, key: &QueryKey, value: T) {
        let idle = {
            let mut entries = self.inner.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(self.inner.defaults));
            entry.status = QueryStatus::Success;
            entry.data = Some(Arc::new(value));
            entry.error = None;
            entry.fetched_at = Some(Instant::now());
            entry.invalidated = false;
            entry.failure_count = 0;
            entry.notify();
            (entry.subscribers == 0).then(|| {
                entry.idle_since = Some(Instant::now());
                entry.options.gc_time
            })
        };
        if let Some(gc_time) = idle {
            self.schedule_gc(key, gc_time);
        }
    }

    /// Forget the data of `key` (and any fetch in flight) but keep the entry
    /// and its subscribers.
    pub(crate) fn reset(&self, key: &QueryKey) {
        let mut entries = self.inner.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.disown();
            entry.status = QueryStatus::Idle;
            entry.data = None;
            entry.error = None;
            entry.fetched_at = None;
            entry.failure_count = 0;
            entry.notify();
        }
    }

    /// Abort in-flight fetches under `prefix`; their results are discarded.
    pub fn cancel(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.lock();
        let cancelled = entries
            .iter_mut()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter_map(|(_, entry)| entry.disown().then_some(()))
            .count();
        if cancelled > 0 {
            tracing::debug!(%prefix, cancelled, "cancelled in-flight fetches");
        }
        cancelled
    }

    /// Cancel and drop every entry under `prefix`.
    pub fn remove(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.lock();
        let keys: Vec<QueryKey> = entries.keys().filter(|key| key.starts_with(prefix)).cloned().collect();
        for key in &keys {
            if let Some(mut entry) = entries.remove(key) {
                entry.disown();
            }
        }
        tracing::debug!(%prefix, removed = keys.len(), "removed entries");
        keys.len()
    }

    pub fn get_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        let entries = self.inner.lock();
        let data = entries.get(key)?.data.clone()?;
        data.downcast::<T>().ok()
    }

    /// Snapshot of `key` as seen by a reader of `T`.
    pub fn state<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QueryState<T, E> {
        let entries = self.inner.lock();
        entries.get(key).map_or_else(QueryState::idle, |entry| entry.snapshot(key, Instant::now()))
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner.lock().keys().cloned().collect()
    }

    /// The application regained focus.
    pub fn on_focus(&self) -> impl Future<Output = ()> + Send + use<E> {
        self.refetch_stale_active(|options| options.refetch_on_focus)
    }

    /// Network connectivity came back.
    pub fn on_reconnect(&self) -> impl Future<Output = ()> + Send + use<E> {
        self.refetch_stale_active(|options| options.refetch_on_reconnect)
    }

    fn refetch_stale_active(&self, wanted: fn(&QueryOptions) -> bool) -> impl Future<Output = ()> + Send + use<E> {
        let now = Instant::now();
        let targets: Vec<QueryKey> = {
            let entries = self.inner.lock();
            entries
                .iter()
                .filter(|(_, entry)| {
                    entry.subscribers > 0
                        && entry.options.enabled
                        && entry.fetcher.is_some()
                        && wanted(&entry.options)
                        && entry.is_stale(now)
                })
                .map(|(key, _)| key.clone())
                .collect()
        };
        let fetches: Vec<_> = targets.iter().filter_map(|key| self.start_fetch(key, false, None)).collect();
        async move {
            join_all(fetches).await;
        }
    }

    /// Drop entries that have had no subscribers for their GC time.
    pub fn gc(&self) -> usize {
        let now = Instant::now();
        let keys = self.keys();
        keys.iter().filter(|key| self.inner.collect(key, now)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Cache = QueryCache<String>;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Fetcher returning `value` after `delay`, counting calls.
    fn counted(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
        delay: Duration,
    ) -> impl Fn() -> BoxFuture<'static, Result<String, String>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(delay).await;
                Ok(format!("{value}-{n}"))
            }
            .boxed()
        }
    }

    fn key(name: &str) -> QueryKey {
        QueryKey::root("test").with(name.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_subscribers_share_one_fetch() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let a = cache.subscribe(key("a"), counted(&calls, "v", ms(100)), QueryOptions::default());
        let b = cache.subscribe(key("a"), counted(&calls, "v", ms(100)), QueryOptions::default());
        let c = cache.subscribe(key("a"), counted(&calls, "v", ms(100)), QueryOptions::default());
        assert_eq!(a.state().status, QueryStatus::Pending);
        let (a, b, c) = tokio::join!(a.settled(), b.settled(), c.settled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for state in [a, b, c] {
            assert_eq!(state.data.as_deref().map(String::as_str), Some("v-1"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_data_is_not_refetched() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions::default().stale_time(Duration::from_secs(60));
        let first = cache.subscribe(key("a"), counted(&calls, "v", ms(10)), options);
        first.settled().await;
        let second = cache.subscribe(key("a"), counted(&calls, "v", ms(10)), options);
        assert!(!second.state().is_fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let third = cache.subscribe(key("a"), counted(&calls, "v", ms(10)), options);
        assert!(third.state().is_fetching);
        third.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_query_never_fetches() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = cache.subscribe(key("a"), counted(&calls, "v", ms(10)), QueryOptions::default().enabled(false));
        tokio::time::sleep(ms(100)).await;
        assert_eq!(sub.state().status, QueryStatus::Idle);
        cache.invalidate(&key("a"), RefetchType::All).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // Manual refetch still works
        assert_eq!(*sub.refetch().await.unwrap(), "v-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disowns_in_flight_result() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = cache.subscribe(key("me"), counted(&calls, "slow", ms(500)), QueryOptions::default());
        tokio::time::sleep(ms(100)).await;
        assert_eq!(cache.cancel(&QueryKey::root("test")), 1);
        cache.set_data(&key("me"), "fresh".to_string());

        tokio::time::sleep(ms(1000)).await;
        let state = sub.state();
        assert_eq!(state.data.as_deref().map(String::as_str), Some("fresh"));
        assert!(!state.is_fetching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_fetch_now_wins() {
        let cache = Cache::new(QueryOptions::default());
        let slow = Arc::new(AtomicUsize::new(0));
        let fast = Arc::new(AtomicUsize::new(0));
        let _sub = cache.subscribe(key("me"), counted(&slow, "stale", ms(500)), QueryOptions::default());
        tokio::time::sleep(ms(10)).await;
        cache.cancel(&key("me"));
        let value = cache.fetch_now(key("me"), counted(&fast, "fresh", ms(50)), QueryOptions::identity()).await.unwrap();
        assert_eq!(*value, "fresh-1");
        tokio::time::sleep(ms(1000)).await;
        assert_eq!(cache.get_data::<String>(&key("me")).as_deref().map(String::as_str), Some("fresh-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_now_joins_in_flight() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let _sub = cache.subscribe(key("a"), counted(&calls, "v", ms(100)), QueryOptions::default());
        let value = cache.fetch_now(key("a"), counted(&calls, "other", ms(100)), QueryOptions::default()).await;
        assert_eq!(*value.unwrap(), "v-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_fail() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>("boom".to_string()) }
        };
        let sub = cache.subscribe(key("a"), fetcher, QueryOptions::default());
        let state = sub.settled().await;
        assert_eq!(state.status, QueryStatus::Error);
        // 1 attempt + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(state.failure_count, 4);
        let error = state.error.unwrap();
        assert_eq!(error.source_error().map(String::as_str), Some("boom"));
        assert_eq!(error.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_filter_and_identity_options() {
        let cache = Cache::with_retry_filter(QueryOptions::default(), |error: &String| error != "unauthorized");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>("unauthorized".to_string()) }
        };
        let sub = cache.subscribe(key("a"), fetcher, QueryOptions::default());
        sub.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>("network".to_string()) }
        };
        let sub = cache.subscribe(key("b"), fetcher, QueryOptions::identity());
        assert!(sub.settled().await.is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_active_refetches_subscribed_only() {
        let cache = Cache::new(QueryOptions::default());
        let active = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(AtomicUsize::new(0));
        let sub = cache.subscribe(key("active"), counted(&active, "a", ms(10)), QueryOptions::default());
        sub.settled().await;
        cache.fetch_now(key("idle"), counted(&idle, "i", ms(10)), QueryOptions::default()).await.unwrap();

        cache.invalidate(&QueryKey::root("test"), RefetchType::Active).await;
        assert_eq!(active.load(Ordering::SeqCst), 2);
        assert_eq!(idle.load(Ordering::SeqCst), 1);
        assert!(cache.state::<String>(&key("idle")).is_stale);
        assert_eq!(sub.state().data.as_deref().map(String::as_str), Some("a-2"));

        cache.invalidate(&QueryKey::root("test"), RefetchType::All).await;
        assert_eq!(idle.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_none_defers_until_next_subscribe() {
        let cache = Cache::new(QueryOptions::default().stale_time(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let options = cache.defaults();
        cache.subscribe(key("a"), counted(&calls, "v", ms(10)), options).settled().await;
        cache.invalidate(&key("a"), RefetchType::None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        cache.subscribe(key("a"), counted(&calls, "v", ms(10)), options).settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_and_resubscribe() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = cache.subscribe(QueryKey::root("auth").with("me"), counted(&calls, "v", ms(10)), QueryOptions::default());
        sub.settled().await;
        cache.set_data(&QueryKey::root("gatherings"), json!([]));
        assert_eq!(cache.remove(&QueryKey::root("auth")), 1);
        assert!(!cache.contains(&QueryKey::root("auth").with("me")));
        assert!(cache.contains(&QueryKey::root("gatherings")));
        assert_eq!(sub.state().status, QueryStatus::Idle);
        // A live subscription can bring its entry back
        assert_eq!(*sub.refetch().await.unwrap(), "v-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_mismatch() {
        let cache = Cache::new(QueryOptions::default());
        cache.set_data(&key("a"), 42u32);
        assert_eq!(cache.get_data::<u32>(&key("a")).as_deref(), Some(&42));
        assert!(cache.get_data::<String>(&key("a")).is_none());
        let state = cache.state::<String>(&key("a"));
        assert!(matches!(state.error, Some(QueryError::TypeMismatch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_after_last_unsubscribe() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions::default().gc_time(ms(1000));
        let sub = cache.subscribe(key("a"), counted(&calls, "v", ms(10)), options);
        sub.settled().await;
        drop(sub);
        tokio::time::sleep(ms(500)).await;
        assert!(cache.contains(&key("a")));
        tokio::time::sleep(ms(600)).await;
        assert!(!cache.contains(&key("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_clock_restarts_on_write() {
        let options = QueryOptions::default().gc_time(ms(1000));
        let cache = Cache::new(options);
        cache.set_data(&key("a"), 1u8);
        tokio::time::sleep(ms(900)).await;
        let fetched = cache.fetch_now(key("a"), || async { Ok::<u8, String>(2) }, options).await.unwrap();
        assert_eq!(*fetched, 2);

        // The timer armed by set_data fires here but the entry was written since
        tokio::time::sleep(ms(200)).await;
        assert_eq!(cache.get_data::<u8>(&key("a")).as_deref(), Some(&2));

        cache.set_data(&key("a"), 3u8);
        tokio::time::sleep(ms(900)).await;
        assert!(cache.contains(&key("a")));
        tokio::time::sleep(ms(200)).await;
        assert!(!cache.contains(&key("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_gc() {
        let cache = Cache::new(QueryOptions::default().gc_time(ms(100)));
        cache.set_data(&key("a"), 1u8);
        assert_eq!(cache.gc(), 0);
        assert!(cache.contains(&key("a")));
        tokio::time::advance(ms(150)).await;
        cache.gc();
        assert!(!cache.contains(&key("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_refetches_stale_active_entries() {
        let cache = Cache::new(QueryOptions::default());
        let focus = Arc::new(AtomicUsize::new(0));
        let no_focus = Arc::new(AtomicUsize::new(0));
        let a = cache.subscribe(key("a"), counted(&focus, "a", ms(10)), QueryOptions::default());
        let mut options = QueryOptions::default();
        options.refetch_on_focus = false;
        let b = cache.subscribe(key("b"), counted(&no_focus, "b", ms(10)), options);
        a.settled().await;
        b.settled().await;

        cache.on_focus().await;
        assert_eq!(focus.load(Ordering::SeqCst), 2);
        assert_eq!(no_focus.load(Ordering::SeqCst), 1);
        cache.on_reconnect().await;
        assert_eq!(no_focus.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_notifies_subscribers() {
        let cache = Cache::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sub = cache.subscribe(key("a"), counted(&calls, "v", ms(10)), QueryOptions::default());
        let state = loop {
            let state = sub.changed().await;
            if state.is_success() {
                break state;
            }
        };
        assert_eq!(state.data.as_deref().map(String::as_str), Some("v-1"));
    }
}
