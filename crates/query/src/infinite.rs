//! Paginated queries.
//!
//! Every page loaded so far lives in a single cache entry as [`Pages`], so
//! invalidating the key refetches the whole list the reader has seen.

use crate::cache::{Fetcher, QueryCache};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::options::QueryOptions;
use crate::state::QueryState;
use crate::subscription::Subscription;
use async_stream::stream;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use std::future::Future;
use std::sync::Arc;

/// One page of results as returned by the server.
pub trait Page: Send + Sync + 'static {
    /// Items on this page
    fn item_count(&self) -> usize;
    /// Items across all pages, if the server reports it
    fn total(&self) -> Option<usize>;
}

/// Cursor of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParam {
    /// Zero-based page number
    pub index: usize,
    /// Items before this page
    pub offset: usize,
    pub limit: usize,
}

impl PageParam {
    pub fn first(limit: usize) -> Self {
        Self { index: 0, offset: 0, limit }
    }
}

/// Pages loaded so far, in order, alongside the cursor each was fetched with.
pub struct Pages<P> {
    pub pages: Vec<Arc<P>>,
    pub params: Vec<PageParam>,
}

impl<P> Default for Pages<P> {
    fn default() -> Self {
        Self { pages: Vec::new(), params: Vec::new() }
    }
}

impl<P> Clone for Pages<P> {
    fn clone(&self) -> Self {
        Self { pages: self.pages.clone(), params: self.params.clone() }
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for Pages<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pages").field("pages", &self.pages).field("params", &self.params).finish()
    }
}

impl<P: Page> Pages<P> {
    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|page| page.item_count()).sum()
    }

    /// Whether the server has items beyond the loaded pages.
    ///
    /// With a reported total the loaded item count is compared against it;
    /// without one, a short page is taken to be the last.
    pub fn has_more(&self) -> bool {
        let (Some(last), Some(param)) = (self.pages.last(), self.params.last()) else { return true };
        if last.item_count() == 0 {
            return false;
        }
        match last.total() {
            Some(total) => self.item_count() < total,
            None => last.item_count() >= param.limit,
        }
    }

    pub fn next_param(&self, limit: usize) -> PageParam {
        PageParam { index: self.pages.len(), offset: self.item_count(), limit }
    }

    fn push(&mut self, param: PageParam, page: P) {
        self.pages.push(Arc::new(page));
        self.params.push(param);
    }
}

type PageFetcher<P, E> = Arc<dyn Fn(PageParam) -> BoxFuture<'static, Result<P, E>> + Send + Sync>;

/// Subscription to a paginated list.
pub struct InfiniteQuery<P: Page, E: Send + Sync + 'static> {
    cache: QueryCache<E>,
    key: QueryKey,
    limit: usize,
    fetch_page: PageFetcher<P, E>,
    subscription: Subscription<Pages<P>, E>,
}

impl<P: Page, E: Send + Sync + 'static> InfiniteQuery<P, E> {
    /// Subscribe to the list under `key`, loading the first page if needed.
    ///
    /// Refetches (after invalidation, focus or reconnect) reload as many
    /// pages as were loaded before, stopping early if the list got shorter.
    pub fn subscribe<F, Fut>(
        cache: &QueryCache<E>,
        key: QueryKey,
        limit: usize,
        options: QueryOptions,
        fetch_page: F,
    ) -> Self
    where
        F: Fn(PageParam) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, E>> + Send + 'static,
    {
        let fetch_page: PageFetcher<P, E> = Arc::new(move |param| fetch_page(param).boxed());
        let reload = {
            let cache = cache.downgrade();
            let key = key.clone();
            let fetch_page = Arc::clone(&fetch_page);
            move || {
                let loaded = cache
                    .upgrade()
                    .and_then(|cache| cache.get_data::<Pages<P>>(&key))
                    .map_or(1, |pages| pages.pages.len().max(1));
                let fetch_page = Arc::clone(&fetch_page);
                async move {
                    let mut pages = Pages::default();
                    while pages.pages.len() < loaded {
                        let param = pages.next_param(limit);
                        let page = fetch_page(param).await?;
                        pages.push(param, page);
                        if !pages.has_more() {
                            break;
                        }
                    }
                    Ok::<_, E>(pages)
                }
            }
        };
        let subscription = cache.subscribe(key.clone(), reload, options);
        Self { cache: cache.clone(), key, limit, fetch_page, subscription }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState<Pages<P>, E> {
        self.subscription.state()
    }

    pub fn data(&self) -> Option<Arc<Pages<P>>> {
        self.subscription.data()
    }

    /// `true` until a loaded page shows the list is exhausted.
    pub fn has_more(&self) -> bool {
        self.data().is_none_or(|pages| pages.has_more())
    }

    /// Load the page after the last loaded one.
    ///
    /// Joins the fetch in flight instead, if there is one. Once the list is
    /// exhausted this returns the loaded pages without fetching.
    pub async fn next_page(&self) -> Result<Arc<Pages<P>>, QueryError<E>> {
        if let Some(fetch) = self.cache.in_flight(&self.key) {
            return self.downcast(fetch.await?);
        }
        let current = self.data();
        if let Some(pages) = &current
            && !pages.has_more()
        {
            return Ok(Arc::clone(pages));
        }
        let fetch = self.cache.start_fetch(&self.key, false, Some(self.append(current))).ok_or(QueryError::Cancelled)?;
        self.downcast(fetch.await?)
    }

    /// Drop every loaded page and load the first one again.
    pub async fn restart(&self) -> Result<Arc<Pages<P>>, QueryError<E>> {
        self.cache.reset(&self.key);
        self.next_page().await
    }

    /// Loaded pages, followed by further pages fetched as the stream is
    /// polled. Ends when the list is exhausted, a fetch makes no progress, or
    /// a fetch fails (after yielding the error).
    pub fn pages(&self) -> impl Stream<Item = Result<Arc<P>, QueryError<E>>> + '_ {
        stream!({
            let mut yielded = 0;
            loop {
                let loaded = match self.data() {
                    Some(pages) if pages.pages.len() > yielded => pages,
                    Some(pages) if !pages.has_more() => break,
                    _ => match self.next_page().await {
                        Ok(pages) if pages.pages.len() > yielded => pages,
                        Ok(_) => break,
                        Err(error) => {
                            yield Err(error);
                            break;
                        },
                    },
                };
                for page in &loaded.pages[yielded..] {
                    yield Ok(Arc::clone(page));
                }
                yielded = loaded.pages.len();
            }
        })
    }

    fn append(&self, current: Option<Arc<Pages<P>>>) -> Fetcher<E> {
        let fetch_page = Arc::clone(&self.fetch_page);
        let limit = self.limit;
        QueryCache::erase(move || {
            let current = current.clone();
            let fetch_page = Arc::clone(&fetch_page);
            async move {
                let mut pages = current.map(|pages| Pages::clone(&pages)).unwrap_or_default();
                let param = pages.next_param(limit);
                let page = fetch_page(param).await?;
                pages.push(param, page);
                Ok::<_, E>(pages)
            }
        })
    }

    fn downcast(&self, data: crate::cache::AnyData) -> Result<Arc<Pages<P>>, QueryError<E>> {
        data.downcast::<Pages<P>>().map_err(|_| QueryError::TypeMismatch { key: self.key.clone() })
    }
}
