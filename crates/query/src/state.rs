use crate::error::QueryError;
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Nothing fetched yet, and nothing in flight
    Idle,
    /// First fetch in flight
    Pending,
    Success,
    Error,
}

/// Snapshot of one cache entry, typed for the reader.
pub struct QueryState<T, E> {
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError<E>>,
    pub fetched_at: Option<Instant>,
    /// Fetched data is past its stale time, or the entry was invalidated
    pub is_stale: bool,
    /// A fetch (first or background) is in flight
    pub is_fetching: bool,
    /// Failed attempts of the current or last fetch
    pub failure_count: u32,
}

impl<T, E> QueryState<T, E> {
    pub(crate) fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            is_stale: true,
            is_fetching: false,
            failure_count: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}

impl<T, E> Clone for QueryState<T, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            is_stale: self.is_stale,
            is_fetching: self.is_fetching,
            failure_count: self.failure_count,
        }
    }
}

impl<T: std::fmt::Debug, E: std::fmt::Debug> std::fmt::Debug for QueryState<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryState")
            .field("status", &self.status)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("is_stale", &self.is_stale)
            .field("is_fetching", &self.is_fetching)
            .field("failure_count", &self.failure_count)
            .finish()
    }
}
