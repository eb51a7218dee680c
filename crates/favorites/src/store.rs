use crate::error::{ErrorKind, Result};
use crate::record::{FavoriteRecord, FavoritesMap};
use exn::ResultExt;
use moim_storage::StoreHandle;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Storage key holding the whole favorites map (for every user).
pub const STORAGE_KEY: &str = "favorites";

type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// Persisted per-user favorites.
///
/// Every operation reads the full map from the store and, when it changes
/// anything, writes the full map back. Operations are serialised so two
/// concurrent toggles can't lose each other's write.
#[derive(Clone)]
pub struct FavoriteStore {
    inner: Arc<Inner>,
}

struct Inner {
    store: StoreHandle,
    clock: Clock,
    lock: Mutex<()>,
}

impl FavoriteStore {
    pub fn new(store: StoreHandle) -> Self {
        Self::with_clock(store, OffsetDateTime::now_utc)
    }

    /// Store that stamps records with times from `clock`.
    pub fn with_clock(store: StoreHandle, clock: impl Fn() -> OffsetDateTime + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(Inner { store, clock: Arc::new(clock), lock: Mutex::new(()) }) }
    }

    fn now(&self) -> OffsetDateTime {
        (self.inner.clock)()
    }

    async fn load(&self) -> Result<FavoritesMap> {
        let Some(raw) = self.inner.store.read(STORAGE_KEY).await.or_raise(|| ErrorKind::Storage)? else {
            return Ok(FavoritesMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(error) => {
                let store = self.inner.store.name();
                tracing::warn!(store, %error, "Persisted favorites are unreadable; treating as empty");
                Ok(FavoritesMap::new())
            },
        }
    }

    async fn save(&self, map: &FavoritesMap) -> Result<()> {
        let raw = serde_json::to_string(map).or_raise(|| ErrorKind::Encode)?;
        self.inner.store.write(STORAGE_KEY, &raw).await.or_raise(|| ErrorKind::Storage)
    }

    /// The favorites of `user`, or `None` if they never favorited anything.
    ///
    /// A record whose `count` disagrees with its `ids` is corrected and
    /// persisted before it is returned.
    #[tracing::instrument(skip(self))]
    pub async fn record(&self, user: u64) -> Result<Option<FavoriteRecord>> {
        let _guard = self.inner.lock.lock().await;
        let mut map = self.load().await?;
        let uid = user.to_string();
        let now = self.now();
        let repaired = match map.get_mut(&uid) {
            Some(record) => record.repair(now),
            None => return Ok(None),
        };
        if repaired {
            tracing::warn!("Favorite count drifted from its ids; repairing");
            self.save(&map).await?;
        }
        Ok(map.remove(&uid))
    }

    /// Favorite `id` for `user` if it isn't already, unfavorite it otherwise.
    ///
    /// Returns whether `id` is a favorite afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn toggle(&self, user: u64, id: u64) -> Result<bool> {
        let _guard = self.inner.lock.lock().await;
        let mut map = self.load().await?;
        let now = self.now();
        let added = map.entry(user.to_string()).or_insert_with(|| FavoriteRecord::empty(now)).toggle(id, now);
        self.save(&map).await?;
        tracing::debug!(added, "Toggled favorite");
        Ok(added)
    }

    pub async fn has(&self, user: u64, id: u64) -> Result<bool> {
        Ok(self.record(user).await?.is_some_and(|record| record.contains(id)))
    }

    pub async fn ids(&self, user: u64) -> Result<Vec<u64>> {
        Ok(self.record(user).await?.map(|record| record.ids).unwrap_or_default())
    }

    pub async fn count(&self, user: u64) -> Result<usize> {
        Ok(self.record(user).await?.map_or(0, |record| record.count))
    }

    /// Forget every user's favorites.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.inner.lock.lock().await;
        self.save(&FavoritesMap::new()).await
    }
}
