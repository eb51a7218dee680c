use crate::error::{ErrorKind, HttpError, Result};
use crate::keys;
use crate::models::{Gathering, GatheringsQuery};
use exn::ResultExt;
use moim_favorites::FavoriteStore;
use moim_http::ApiClient;
use moim_http::error::ErrorKind as HttpErrorKind;
use moim_query::{QueryCache, RefetchType, Subscription};
use std::time::Duration;

const GATHERINGS_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Favorites kept on this device, and the gatherings they point at.
#[derive(Clone)]
pub struct Favorites {
    client: ApiClient,
    cache: QueryCache<HttpError>,
    store: FavoriteStore,
}

impl Favorites {
    pub fn new(client: ApiClient, cache: QueryCache<HttpError>, store: FavoriteStore) -> Self {
        Self { client, cache, store }
    }

    pub fn store(&self) -> &FavoriteStore {
        &self.store
    }

    /// Flip gathering `id` in `user`'s favorites and refetch every favorites
    /// query on screen. Returns whether `id` is a favorite afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn toggle(&self, user: u64, id: u64) -> Result<bool> {
        let liked = self.store.toggle(user, id).await.or_raise(|| ErrorKind::Favorites)?;
        self.cache.invalidate(&keys::favorites::all(), RefetchType::Active).await;
        Ok(liked)
    }

    pub async fn is_liked(&self, user: u64, id: u64) -> Result<bool> {
        self.store.has(user, id).await.or_raise(|| ErrorKind::Favorites)
    }

    pub async fn ids(&self, user: u64) -> Result<Vec<u64>> {
        self.store.ids(user).await.or_raise(|| ErrorKind::Favorites)
    }

    pub async fn count(&self, user: u64) -> Result<usize> {
        self.store.count(user).await.or_raise(|| ErrorKind::Favorites)
    }

    /// Subscribe to the favorited gatherings of `user` matching `filter`.
    ///
    /// Stays disabled for guests (`user == 0`). The favorite ids are read
    /// again on every fetch: with none, the list is empty without asking the
    /// API, and a refetch after [`toggle`](Self::toggle) sees the new set.
    pub async fn gatherings(&self, user: u64, filter: &GatheringsQuery) -> Result<Subscription<Vec<Gathering>, HttpError>> {
        // Repairs a drifted count before the first fetch reads the ids
        self.count(user).await?;
        let options = self.cache.defaults().stale_time(GATHERINGS_STALE_TIME).enabled(user > 0);
        let key = keys::favorites::list(user, Some(filter.key_segment()));

        let client = self.client.clone();
        let store = self.store.clone();
        let filter = filter.clone();
        let fetcher = move || {
            let client = client.clone();
            let store = store.clone();
            let filter = filter.clone();
            async move {
                let ids = store.ids(user).await.map_err(|error| {
                    tracing::warn!(?error, "Could not read favorites");
                    exn::Exn::from(HttpErrorKind::InvalidRequest("favorites are unreadable".into()))
                })?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let joined = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
                let params = filter.to_params().param("id", Some(joined));
                client.get::<Vec<Gathering>>("/gatherings", &params).await
            }
        };
        Ok(self.cache.subscribe(key, fetcher, options))
    }
}

impl std::fmt::Debug for Favorites {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Favorites").finish_non_exhaustive()
    }
}
