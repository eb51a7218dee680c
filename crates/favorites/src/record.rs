use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Favorites of one user.
///
/// `count` duplicates `ids.len()`; it is kept because other readers of the
/// persisted map rely on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRecord {
    pub count: usize,
    pub ids: Vec<u64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl FavoriteRecord {
    pub fn empty(now: OffsetDateTime) -> Self {
        Self { count: 0, ids: Vec::new(), updated_at: Some(now) }
    }

    pub fn is_consistent(&self) -> bool {
        self.count == self.ids.len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Add `id` if absent, remove it if present. Returns whether it is now a
    /// favorite.
    pub fn toggle(&mut self, id: u64, now: OffsetDateTime) -> bool {
        let added = match self.ids.iter().position(|&existing| existing == id) {
            Some(index) => {
                self.ids.remove(index);
                false
            },
            None => {
                self.ids.push(id);
                true
            },
        };
        self.count = self.ids.len();
        self.updated_at = Some(now);
        added
    }

    /// Recompute `count` from `ids`. Returns `true` if it had drifted.
    pub fn repair(&mut self, now: OffsetDateTime) -> bool {
        if self.is_consistent() {
            return false;
        }
        self.count = self.ids.len();
        self.updated_at = Some(now);
        true
    }
}

/// Every user's favorites, keyed by the user id as a string.
pub type FavoritesMap = BTreeMap<String, FavoriteRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_wire_format() {
        let record: FavoriteRecord =
            serde_json::from_str(r#"{"count":2,"ids":[1,2],"updatedAt":"2025-09-01T10:00:00.000Z"}"#).unwrap();
        assert_eq!(record.updated_at, Some(datetime!(2025-09-01 10:00 UTC)));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["updatedAt"], "2025-09-01T10:00:00Z");
        assert_eq!(json["count"], 2);
    }

    #[test]
    fn test_missing_timestamp_is_tolerated() {
        let record: FavoriteRecord = serde_json::from_str(r#"{"count":0,"ids":[]}"#).unwrap();
        assert_eq!(record.updated_at, None);
    }

    #[test]
    fn test_toggle_twice_restores_ids() {
        let first = datetime!(2025-09-01 10:00 UTC);
        let second = datetime!(2025-09-01 10:05 UTC);
        let mut record = FavoriteRecord { count: 2, ids: vec![4, 9], updated_at: None };
        assert!(record.toggle(5, first));
        assert_eq!(record.ids, vec![4, 9, 5]);
        assert!(!record.toggle(5, second));
        assert_eq!(record.ids, vec![4, 9]);
        assert_eq!(record.count, 2);
        assert_eq!(record.updated_at, Some(second));
    }

    #[test]
    fn test_repair() {
        let now = datetime!(2025-09-01 10:00 UTC);
        let mut record = FavoriteRecord { count: 3, ids: vec![1, 2], updated_at: None };
        assert!(record.repair(now));
        assert_eq!(record.count, 2);
        assert_eq!(record.updated_at, Some(now));
        assert!(!record.repair(datetime!(2030-01-01 0:00 UTC)));
        assert_eq!(record.updated_at, Some(now));
    }
}
