//! Query Error Types
//!
//! Query results are shared between every subscriber of a key, so the error
//! has to be cheaply cloneable. The fetcher's own error is kept unchanged
//! behind an `Arc`.

use crate::QueryKey;
use std::fmt;
use std::sync::Arc;

pub enum QueryError<E> {
    /// The fetcher failed on its last attempt
    Failed { error: Arc<E>, attempts: u32 },
    /// The fetch was cancelled and its result discarded
    Cancelled,
    /// The key holds data of a different type than requested
    TypeMismatch { key: QueryKey },
}

impl<E> QueryError<E> {
    /// The fetcher's error, if the query failed.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Cancelled | Self::TypeMismatch { .. } => None,
        }
    }

    /// Attempts made before giving up (zero unless `Failed`).
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. } => *attempts,
            Self::Cancelled | Self::TypeMismatch { .. } => 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl<E> Clone for QueryError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Failed { error, attempts } => Self::Failed { error: Arc::clone(error), attempts: *attempts },
            Self::Cancelled => Self::Cancelled,
            Self::TypeMismatch { key } => Self::TypeMismatch { key: key.clone() },
        }
    }
}

impl<E: fmt::Display> fmt::Display for QueryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error, attempts: 1 } => write!(f, "{error}"),
            Self::Failed { error, attempts } => write!(f, "{error} (after {attempts} attempts)"),
            Self::Cancelled => f.write_str("query cancelled"),
            Self::TypeMismatch { key } => write!(f, "cached data for {key} has a different type"),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for QueryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error, attempts } => {
                f.debug_struct("Failed").field("error", error).field("attempts", attempts).finish()
            },
            Self::Cancelled => f.write_str("Cancelled"),
            Self::TypeMismatch { key } => f.debug_struct("TypeMismatch").field("key", key).finish(),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for QueryError<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let error: QueryError<String> = QueryError::Failed { error: Arc::new("boom".to_string()), attempts: 1 };
        assert_eq!(error.to_string(), "boom");
        let error: QueryError<String> = QueryError::Failed { error: Arc::new("boom".to_string()), attempts: 4 };
        assert_eq!(error.to_string(), "boom (after 4 attempts)");
        assert_eq!(QueryError::<String>::Cancelled.to_string(), "query cancelled");
    }

    #[test]
    fn test_clone_shares_source() {
        let error: QueryError<String> = QueryError::Failed { error: Arc::new("boom".to_string()), attempts: 2 };
        let clone = error.clone();
        assert!(std::ptr::eq(error.source_error().unwrap(), clone.source_error().unwrap()));
        assert_eq!(clone.attempts(), 2);
    }
}
