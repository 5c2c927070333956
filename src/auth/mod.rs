//! Authentication for the registry connector
//!
//! Implements the OAuth 2.0 Authorization Code flow with PKCE (browser
//! redirect + loopback callback) and keychain-backed credential storage.

pub mod credentials;
pub mod oauth;

pub use credentials::{AuthStatus, Credential, CredentialStore, KeyringStore, MemoryStore, StoreError};
pub use oauth::{AuthError, AuthSession, LoginAttempt, LoginPhase, DEFAULT_LOGIN_TIMEOUT};
