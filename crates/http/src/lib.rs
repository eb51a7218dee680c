//! Typed HTTP client for the moim API.
//!
//! [`ApiClient`] turns a logical request (method, path, query, body) into a
//! call on a [`Transport`](transport::Transport) and normalizes the outcome:
//! either a value decoded into the caller's type, or one classified
//! [`ErrorKind`](error::ErrorKind). Along the way it attaches the current
//! credential, disables caching, drives the loading indicator around
//! mutations, and tears the session down when the server stops accepting the
//! credential.

mod body;
mod client;
pub mod error;
pub mod messages;
mod query;
pub mod session;
pub mod transport;

pub use crate::body::{Body, MultipartForm, Part, PartValue};
pub use crate::client::{ApiClient, ApiClientBuilder, ApiRequest};
pub use crate::query::QueryParams;
pub use reqwest::Method;
