use crate::error::{self, ErrorKind, HttpError, Result};
use crate::keys;
use crate::models::{CreateReviewBody, Review, ReviewPage, ReviewScore, ReviewScoresQuery, ReviewsQuery};
use exn::ResultExt;
use moim_http::{ApiClient, Body};
use moim_query::{InfiniteQuery, PageParam, QueryCache, RefetchType, Subscription};

/// Page size when the filter doesn't name one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Clone)]
pub struct Reviews {
    client: ApiClient,
    cache: QueryCache<HttpError>,
}

impl Reviews {
    pub fn new(client: ApiClient, cache: QueryCache<HttpError>) -> Self {
        Self { client, cache }
    }

    /// Reviews matching `filter`, loaded page by page with `offset`/`limit`.
    pub fn list(&self, filter: ReviewsQuery) -> InfiniteQuery<ReviewPage, HttpError> {
        let limit = filter.limit.filter(|&limit| limit > 0).unwrap_or(DEFAULT_PAGE_SIZE);
        let key = keys::reviews::list(Some(filter.key_segment()));
        let client = self.client.clone();
        let fetch_page = move |param: PageParam| {
            let client = client.clone();
            let params = filter.to_params().param("offset", Some(param.offset)).param("limit", Some(param.limit));
            async move { client.get::<ReviewPage>("/reviews", &params).await }
        };
        InfiniteQuery::subscribe(&self.cache, key, limit, self.cache.defaults(), fetch_page)
    }

    pub fn scores(&self, filter: &ReviewScoresQuery) -> Subscription<Vec<ReviewScore>, HttpError> {
        let key = keys::reviews::scores(Some(filter.key_segment()));
        let client = self.client.clone();
        let params = filter.to_params();
        let fetcher = move || {
            let client = client.clone();
            let params = params.clone();
            async move { client.get::<Vec<ReviewScore>>("/reviews/scores", &params).await }
        };
        self.cache.subscribe(key, fetcher, self.cache.defaults())
    }

    /// Post a review, then refetch every review query on screen.
    #[tracing::instrument(skip_all, fields(gathering = body.gathering_id))]
    pub async fn create(&self, body: &CreateReviewBody) -> Result<Review> {
        let json = serde_json::to_value(body).or_raise(|| ErrorKind::Encode)?;
        let review: Review = error::api(self.client.post("/reviews", Some(Body::Json(json))).await)?;
        self.cache.invalidate(&keys::reviews::all(), RefetchType::Active).await;
        Ok(review)
    }
}
