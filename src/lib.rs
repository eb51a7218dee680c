//! Request, cache and session coordination for the moim gathering platform.
//!
//! [`Moim`] wires the workspace crates together: one [`ApiClient`] whose
//! session expiry tears down the `auth` namespace of one shared
//! [`QueryCache`], a [`TokenStore`] for the credential, persisted state in a
//! [`KeyValueStore`](moim_storage::KeyValueStore), and the loading indicator
//! driven around mutations. The domain services ([`Auth`], [`Favorites`],
//! [`Reviews`]) are cheap handles onto that shared state.

pub mod auth;
pub mod error;
pub mod favorites;
pub mod keys;
pub mod models;
pub mod reviews;

pub use crate::auth::{AUTH_STORAGE_KEY, Auth, AuthSession, SessionTeardown};
pub use crate::error::{Error, ErrorKind, HttpError, Result};
pub use crate::favorites::Favorites;
pub use crate::reviews::Reviews;

use exn::ResultExt;
use moim_auth::{Token, TokenStore};
use moim_config::{Config, QueryConfig, StorageBackend};
use moim_favorites::FavoriteStore;
use moim_http::ApiClient;
use moim_http::session::Navigator;
use moim_http::transport::{ReqwestTransport, TransportHandle};
use moim_loading::{Indicator, LoadingCoordinator, NoIndicator, Timings};
use moim_query::{QueryCache, QueryOptions, RetryPolicy};
use moim_storage::StoreHandle;
use moim_storage::backend::{FileStore, MemoryStore};
use std::sync::Arc;

/// Cache defaults taken from configuration.
pub fn query_defaults(config: &QueryConfig) -> QueryOptions {
    QueryOptions {
        enabled: true,
        stale_time: config.stale_time(),
        gc_time: config.gc_time(),
        retry: RetryPolicy {
            attempts: config.retry,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        },
        refetch_on_focus: config.refetch_on_focus,
        refetch_on_reconnect: config.refetch_on_reconnect,
    }
}

/// Everything a host needs to talk to the moim API.
#[derive(Clone)]
pub struct Moim {
    pub config: Config,
    pub tokens: TokenStore,
    pub cache: QueryCache<HttpError>,
    pub loading: LoadingCoordinator,
    pub client: ApiClient,
    pub store: StoreHandle,
    pub session: AuthSession,
    pub favorite_store: FavoriteStore,
}

pub struct MoimBuilder {
    config: Config,
    transport: Option<TransportHandle>,
    store: Option<StoreHandle>,
    indicator: Option<Arc<dyn Indicator>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl MoimBuilder {
    /// Use `transport` instead of a real HTTP connection.
    pub fn transport(mut self, transport: TransportHandle) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Persist into `store` instead of the configured backend.
    pub fn store(mut self, store: StoreHandle) -> Self {
        self.store = Some(store);
        self
    }

    pub fn indicator(mut self, indicator: Arc<dyn Indicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    fn open_store(config: &Config) -> Result<StoreHandle> {
        Ok(match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::default()),
            StorageBackend::File => {
                let root = config.storage.resolve_path().or_raise(|| ErrorKind::Config)?;
                Arc::new(FileStore::new("file", root).or_raise(|| ErrorKind::Storage)?)
            },
        })
    }

    /// Open storage, restore the persisted session and wire the client.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP transport can't be set up or the configured storage
    /// can't be opened or read.
    pub async fn build(self) -> Result<Moim> {
        let config = self.config;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.api.timeout()).or_raise(|| ErrorKind::Transport)?),
        };
        let store = match self.store {
            Some(store) => store,
            None => Self::open_store(&config)?,
        };
        tracing::debug!(store = store.name(), "Opened storage");

        let tokens = TokenStore::default();
        let session = AuthSession::load(tokens.clone(), Arc::clone(&store)).await?;
        let cache = QueryCache::with_retry_filter(query_defaults(&config.query), |error: &HttpError| {
            error.is_retryable()
        });
        let timings = Timings {
            show_delay: config.loading.show_delay(),
            hide_quiet: config.loading.hide_quiet(),
            min_visible: config.loading.min_visible(),
        };
        let loading = LoadingCoordinator::new(timings, self.indicator.unwrap_or_else(|| Arc::new(NoIndicator)));

        let mut client = ApiClient::builder(&config.api.base_url, &config.api.team_id, transport, tokens.clone())
            .loading(loading.clone())
            .session_handler(Arc::new(SessionTeardown::new(cache.clone(), session.clone())))
            .fallback_token(config.api.token.as_deref().map(Token::from));
        if let Some(navigator) = self.navigator {
            client = client.navigator(navigator);
        }
        let client = client.build();
        let favorite_store = FavoriteStore::new(Arc::clone(&store));

        Ok(Moim { config, tokens, cache, loading, client, store, session, favorite_store })
    }
}

impl Moim {
    pub fn builder(config: Config) -> MoimBuilder {
        MoimBuilder { config, transport: None, store: None, indicator: None, navigator: None }
    }

    pub fn auth(&self) -> Auth {
        Auth::new(self.client.clone(), self.cache.clone(), self.session.clone())
    }

    pub fn favorites(&self) -> Favorites {
        Favorites::new(self.client.clone(), self.cache.clone(), self.favorite_store.clone())
    }

    pub fn reviews(&self) -> Reviews {
        Reviews::new(self.client.clone(), self.cache.clone())
    }
}

impl std::fmt::Debug for Moim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Moim")
            .field("base_url", &self.config.api.base_url)
            .field("team_id", &self.config.api.team_id)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
