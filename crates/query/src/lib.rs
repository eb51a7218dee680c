//! Keyed cache of server state.
//!
//! Values are fetched by caller-supplied async fetchers and stored under a
//! structural [`QueryKey`]. The cache deduplicates concurrent fetches of the
//! same key, retries failures with exponential back-off, tracks staleness and
//! garbage-collects entries nobody subscribes to any more.

mod cache;
pub mod error;
mod infinite;
mod key;
mod options;
mod state;
mod subscription;

pub use crate::cache::{QueryCache, RefetchType};
pub use crate::error::QueryError;
pub use crate::infinite::{InfiniteQuery, Page, PageParam, Pages};
pub use crate::key::QueryKey;
pub use crate::options::{QueryOptions, RetryPolicy};
pub use crate::state::{QueryState, QueryStatus};
pub use crate::subscription::Subscription;
