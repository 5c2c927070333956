//! Credential storage for registry authentication
//!
//! Credentials are held in the platform secret facility (keychain, Secret
//! Service, Credential Manager) keyed by session, never in plaintext files.
//! Writes and clears for the same session key are serialized so a fresh
//! login cannot race a logout.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Keychain service name for this connector
const KEYRING_SERVICE: &str = "provena-cli";

/// A bearer credential for one authenticated session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque access token presented on every registry call
    pub access_token: String,
    /// Refresh token, when the authorization server granted one
    pub refresh_token: Option<String>,
    /// Access token expiry; absent means the token does not expire
    pub expires_at: Option<DateTime<Utc>>,
    /// Session key this credential belongs to
    pub subject: String,
}

impl Credential {
    /// True when the token expires within `window` from now (or already has).
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + window >= expires_at,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }
}

/// Errors from the credential store
///
/// `Unavailable` means the platform facility could not be reached; callers
/// must treat that as "not authenticated", never as a crash.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode credential: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Session-keyed credential storage
pub trait CredentialStore: Send + Sync {
    fn put(&self, session_key: &str, credential: &Credential) -> Result<()>;
    fn get(&self, session_key: &str) -> Result<Option<Credential>>;
    fn clear(&self, session_key: &str) -> Result<()>;
}

/// Credential store backed by the OS secret facility
pub struct KeyringStore {
    service: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
            locks: DashMap::new(),
        }
    }

    fn key_lock(&self, session_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn entry(&self, session_key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, session_key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Releases before v0.3 cached tokens on disk; sweep any leftovers.
    fn legacy_cache_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".provena").join("token-cache.json"))
    }

    fn sweep_legacy_cache() {
        if let Some(path) = Self::legacy_cache_path() {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    log::warn!("Could not remove legacy token cache {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn put(&self, session_key: &str, credential: &Credential) -> Result<()> {
        let lock = self.key_lock(session_key);
        let _guard = lock.lock().expect("credential key lock poisoned");

        let payload = serde_json::to_string(credential)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.entry(session_key)?
            .set_password(&payload)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn get(&self, session_key: &str) -> Result<Option<Credential>> {
        let entry = self.entry(session_key)?;
        match entry.get_password() {
            Ok(payload) => match serde_json::from_str(&payload) {
                Ok(credential) => Ok(Some(credential)),
                Err(e) => {
                    // A corrupt entry reads as "not authenticated".
                    log::warn!("Discarding unreadable credential for '{}': {}", session_key, e);
                    Ok(None)
                }
            },
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    fn clear(&self, session_key: &str) -> Result<()> {
        let lock = self.key_lock(session_key);
        let _guard = lock.lock().expect("credential key lock poisoned");

        Self::sweep_legacy_cache();

        let entry = self.entry(session_key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }
}

/// In-memory credential store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Credential>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for MemoryStore {
    fn put(&self, session_key: &str, credential: &Credential) -> Result<()> {
        self.entries.insert(session_key.to_string(), credential.clone());
        Ok(())
    }

    fn get(&self, session_key: &str) -> Result<Option<Credential>> {
        Ok(self.entries.get(session_key).map(|c| c.value().clone()))
    }

    fn clear(&self, session_key: &str) -> Result<()> {
        self.entries.remove(session_key);
        Ok(())
    }
}

/// Authentication status for a session key
#[derive(Debug)]
pub enum AuthStatus {
    NotAuthenticated,
    Expired,
    Authenticated { expires_at: Option<DateTime<Utc>> },
}

impl AuthStatus {
    pub fn for_credential(credential: Option<&Credential>) -> Self {
        match credential {
            None => AuthStatus::NotAuthenticated,
            Some(c) if c.is_expired() && c.refresh_token.is_none() => AuthStatus::Expired,
            Some(c) => AuthStatus::Authenticated { expires_at: c.expires_at },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(subject: &str, expires_at: Option<DateTime<Utc>>) -> Credential {
        Credential {
            access_token: "at-test".to_string(),
            refresh_token: Some("rt-test".to_string()),
            expires_at,
            subject: subject.to_string(),
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("default").unwrap().is_none());

        store.put("default", &credential("default", None)).unwrap();
        let loaded = store.get("default").unwrap().unwrap();
        assert_eq!(loaded.access_token, "at-test");
        assert_eq!(loaded.subject, "default");

        store.clear("default").unwrap();
        assert!(store.get("default").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_one_credential_per_key() {
        let store = MemoryStore::new();
        store.put("a", &credential("a", None)).unwrap();
        let mut replacement = credential("a", None);
        replacement.access_token = "at-new".to_string();
        store.put("a", &replacement).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().unwrap().access_token, "at-new");
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = MemoryStore::new();
        store.clear("missing").unwrap();
        store.clear("missing").unwrap();
    }

    #[test]
    fn test_expires_within() {
        let fresh = credential("s", Some(Utc::now() + Duration::hours(1)));
        assert!(!fresh.expires_within(Duration::seconds(60)));
        assert!(!fresh.is_expired());

        let near = credential("s", Some(Utc::now() + Duration::seconds(30)));
        assert!(near.expires_within(Duration::seconds(60)));
        assert!(!near.is_expired());

        let past = credential("s", Some(Utc::now() - Duration::seconds(5)));
        assert!(past.is_expired());

        let unbounded = credential("s", None);
        assert!(!unbounded.expires_within(Duration::days(365)));
    }

    #[test]
    fn test_auth_status() {
        assert!(matches!(
            AuthStatus::for_credential(None),
            AuthStatus::NotAuthenticated
        ));

        let mut expired = credential("s", Some(Utc::now() - Duration::hours(1)));
        expired.refresh_token = None;
        assert!(matches!(
            AuthStatus::for_credential(Some(&expired)),
            AuthStatus::Expired
        ));

        // An expired token with a refresh token still counts as a session.
        let refreshable = credential("s", Some(Utc::now() - Duration::hours(1)));
        assert!(matches!(
            AuthStatus::for_credential(Some(&refreshable)),
            AuthStatus::Authenticated { .. }
        ));
    }

    #[test]
    fn test_keyed_locks_are_per_key() {
        let store = KeyringStore::with_service("provena-cli-test");
        let a = store.key_lock("a");
        let a2 = store.key_lock("a");
        let b = store.key_lock("b");
        assert!(Arc::ptr_eq(&a, &a2));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
