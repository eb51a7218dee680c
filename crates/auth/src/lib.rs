//! Single source of truth for the current bearer credential.
//!
//! The token only ever lives in memory. Every outgoing request reads it
//! afresh, so [`TokenStore::set`] takes effect for the very next request.

mod token;

pub use crate::token::Token;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared, observable credential cell.
///
/// Cloning is cheap; all clones see the same credential.
#[derive(Clone)]
pub struct TokenStore {
    sender: Arc<watch::Sender<Option<Token>>>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TokenStore {
    pub fn new(initial: Option<Token>) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender: Arc::new(sender) }
    }

    /// Current credential, if any.
    pub fn get(&self) -> Option<Token> {
        self.sender.borrow().clone()
    }

    pub fn is_present(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// Replace the credential.
    pub fn set(&self, token: impl Into<Token>) {
        let token = token.into();
        self.sender.send_replace(Some(token));
        tracing::debug!("credential set");
    }

    /// Remove the credential. Clearing an empty store notifies nobody.
    pub fn clear(&self) {
        let changed = self.sender.send_if_modified(|current| current.take().is_some());
        if changed {
            tracing::debug!("credential cleared");
        }
    }

    /// Observe credential changes.
    pub fn watch(&self) -> watch::Receiver<Option<Token>> {
        self.sender.subscribe()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").field("present", &self.is_present()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let store = TokenStore::default();
        assert_eq!(store.get(), None);
        store.set("abc");
        assert_eq!(store.get().unwrap().as_str(), "abc");
        store.set("def");
        assert_eq!(store.get().unwrap().as_str(), "def");
        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_clones_share_state() {
        let store = TokenStore::default();
        let clone = store.clone();
        store.set("abc");
        assert!(clone.is_present());
        clone.clear();
        assert!(!store.is_present());
    }

    #[tokio::test]
    async fn test_watch_notifies() {
        let store = TokenStore::default();
        let mut rx = store.watch();
        store.set("abc");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(Token::as_str), Some("abc"));

        store.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        // Clearing again is not a change
        store.clear();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_debug_does_not_leak() {
        let store = TokenStore::new(Some(Token::from("secret")));
        assert!(!format!("{store:?}").contains("secret"));
    }
}
