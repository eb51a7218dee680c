//! Application Error Types
//!
//! Flows that span several crates (sign-in touches the API, the cache and
//! local storage) report one of the coarse kinds below, with the underlying
//! crate error attached as the cause where one exists.

use derive_more::{Display, Error};
use moim_http::error::ErrorKind as HttpErrorKind;
use moim_query::QueryError;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Fetch error type shared by every cached query.
pub type HttpError = moim_http::error::Error;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("could not set up the HTTP transport")]
    Transport,
    #[display("local storage failed")]
    Storage,
    #[display("could not update favorites")]
    Favorites,
    #[display("could not encode the request body")]
    Encode,
    /// The API call failed; `status` is the classified HTTP status, if any
    #[display("API request failed")]
    Api { status: Option<u16>, session_expired: bool },
    /// The call was superseded before it finished
    #[display("request was cancelled")]
    Cancelled,
}

impl ErrorKind {
    pub fn api(error: &HttpErrorKind) -> Self {
        Self::Api { status: error.status(), session_expired: matches!(error, HttpErrorKind::SessionExpired(_)) }
    }

    /// Classify a failed cached query. The fetcher's error tree stays with
    /// the cache entry; only its classification is carried over.
    pub fn query(error: &QueryError<HttpError>) -> Self {
        match error {
            QueryError::Failed { error, .. } => Self::api(error),
            QueryError::Cancelled | QueryError::TypeMismatch { .. } => Self::Cancelled,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage => true,
            Self::Api { status, session_expired } => {
                !session_expired && status.is_none_or(|status| status >= 500 || status == 408 || status == 429)
            },
            _ => false,
        }
    }
}

/// Attach an HTTP failure to an application error of matching kind.
pub fn api<T>(result: moim_http::error::Result<T>) -> Result<T> {
    use exn::ResultExt;
    match result {
        Ok(value) => Ok(value),
        Err(error) => {
            let kind = ErrorKind::api(&error);
            Err(error).or_raise(|| kind)
        },
    }
}

pub fn query<T>(result: std::result::Result<T, QueryError<HttpError>>) -> Result<T> {
    result.map_err(|error| exn::Exn::from(ErrorKind::query(&error)))
}
