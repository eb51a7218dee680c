//! Per-user favorite gatherings, persisted locally.
//!
//! Favorites never reach the server: the whole map lives under a single key
//! of a [`moim_storage::KeyValueStore`] and is rewritten on every change.

pub mod error;
mod record;
mod store;

pub use crate::record::{FavoriteRecord, FavoritesMap};
pub use crate::store::{FavoriteStore, STORAGE_KEY};
