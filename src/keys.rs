//! Query key factories.
//!
//! Keys are namespaced by their first segment so a whole domain can be
//! invalidated, cancelled or removed by its root key. Missing parameter
//! objects become `{}`, so "no filter" is one entry rather than several.

use moim_query::QueryKey;
use serde_json::{Value, json};

fn params(value: Option<Value>) -> Value {
    value.unwrap_or_else(|| json!({}))
}

pub mod auth {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("auth")
    }

    pub fn me() -> QueryKey {
        all().with("me")
    }

    /// Current user as seen with (`authed`) or without a credential. Keeping
    /// both apart means a sign-in never reads the guest's cached answer.
    pub fn me_state(authed: bool) -> QueryKey {
        me().with(if authed { "authed" } else { "guest" })
    }
}

pub mod gatherings {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("gatherings")
    }

    pub fn list(filter: Option<Value>) -> QueryKey {
        all().with("list").with(params(filter))
    }

    pub fn detail(id: u64) -> QueryKey {
        all().with("detail").with(id)
    }

    pub fn joined(filter: Option<Value>) -> QueryKey {
        all().with("joined").with(params(filter))
    }

    pub fn participants(id: u64, filter: Option<Value>) -> QueryKey {
        all().with("participants").with(id).with(params(filter))
    }
}

pub mod reviews {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("reviews")
    }

    pub fn list(filter: Option<Value>) -> QueryKey {
        all().with("list").with(params(filter))
    }

    pub fn scores(filter: Option<Value>) -> QueryKey {
        all().with("scores").with(params(filter))
    }
}

pub mod favorites {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::root("favorites")
    }

    pub fn list(user: u64, filter: Option<Value>) -> QueryKey {
        all().with(user).with(params(filter))
    }
}
