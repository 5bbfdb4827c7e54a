//! Shared credential handle for one conference session
//!
//! The conferencing API scopes everything to a short-lived bearer token that
//! the server may rotate on refresh. The REST client writes rotations into a
//! [`TokenStore`]; the event transport reads the current value when it builds
//! the push-channel URL. Sharing the handle means rotation never invalidates
//! a stream mid-flight: the next reconnect simply picks up the new value.

use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;

/// Response body of `request_token` / `refresh_token`
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    /// Opaque bearer value authorizing API calls for one alias
    pub token: String,
    /// Server-declared validity in seconds, when provided
    #[serde(default)]
    pub expires: Option<serde_json::Value>,
}

/// Cheap-to-clone handle to the current credential
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current token, if one is held
    pub fn current(&self) -> Option<String> {
        self.inner.read().clone()
    }

    /// Replace the held token
    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write() = Some(token.into());
    }

    /// Rotate only if the server actually returned a new value
    pub fn rotate_if_changed(&self, token: &str) -> bool {
        let mut guard = self.inner.write();
        if guard.as_deref() == Some(token) {
            return false;
        }
        *guard = Some(token.to_string());
        true
    }

    /// Drop the held token
    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_reports_change() {
        let store = TokenStore::new();
        store.set("abc");
        assert!(!store.rotate_if_changed("abc"));
        assert!(store.rotate_if_changed("def"));
        assert_eq!(store.current().as_deref(), Some("def"));
        store.clear();
        assert_eq!(store.current(), None);
    }
}
