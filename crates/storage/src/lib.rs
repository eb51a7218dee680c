//! Key-value persistence for client-side state.
//!
//! Client state that must survive a restart (favorites, the cached user
//! profile) is persisted as whole JSON documents under fixed keys. This crate
//! only moves strings around; what the strings mean is up to the caller.

pub mod backend;
pub mod error;
mod key;

pub use crate::backend::KeyValueStore;
pub use crate::key::validate as validate_key;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn KeyValueStore>;
