//! Browser-redirect login for the registry
//!
//! Implements the OAuth 2.0 Authorization Code flow with PKCE against the
//! deployment's Keycloak realm:
//!
//! 1. Generate a PKCE pair and a state token
//! 2. Bind a loopback callback listener on an ephemeral port
//! 3. Open the user's browser at the authorization URL
//! 4. Await the redirect carrying the code, verify the state
//! 5. Exchange the code for tokens and store the credential
//!
//! The listener is a scoped resource: it is torn down on success, failure,
//! timeout, and cancellation alike, so repeated login attempts never leak
//! sockets.

use super::credentials::{AuthStatus, Credential, CredentialStore, StoreError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::AuthConfig;

/// How close to expiry a token may get before `ensure_fresh` refreshes it.
///
/// The realm's default access-token lifetime is five minutes; one minute of
/// margin absorbs clock drift and the exchange round trip.
pub const REFRESH_SKEW_SECS: i64 = 60;

/// Default time to wait for the user to complete the browser login.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

const USER_AGENT: &str = concat!("provena-cli/", env!("CARGO_PKG_VERSION"));

/// Errors from the authentication session
#[derive(Debug, Error)]
pub enum AuthError {
    /// A login attempt is already listening for its callback
    #[error("a login is already in progress - complete or cancel it first")]
    LoginInProgress,

    /// No local port could be bound for the callback listener
    #[error("could not bind the login callback listener: {0}")]
    ListenerBindError(String),

    /// The redirect carried a state token we did not generate
    #[error("login state mismatch - the callback did not match this login attempt")]
    StateMismatch,

    /// The authorization server reported the user denied access
    #[error("authorization was denied: {0}")]
    UserDenied(String),

    /// No callback arrived before the deadline
    #[error("timed out waiting for the login callback")]
    Timeout,

    /// Code exchange or token refresh failed at the authorization server
    #[error("token exchange failed: {0}")]
    Exchange(String),

    /// No usable credential; the user must log in again
    #[error("not authenticated - run `prov-ctl auth login` first")]
    ReauthRequired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Phases of a single login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    Idle,
    Listening,
    CodeReceived,
    Exchanging,
    Authenticated,
    Denied,
    TimedOut,
    Error,
}

impl AuthError {
    /// The terminal login phase this error corresponds to.
    pub fn terminal_phase(&self) -> LoginPhase {
        match self {
            AuthError::UserDenied(_) => LoginPhase::Denied,
            AuthError::Timeout => LoginPhase::TimedOut,
            _ => LoginPhase::Error,
        }
    }
}

/// PKCE code verifier and S256 challenge pair
struct PkcePair {
    verifier: String,
    challenge: String,
}

/// Generate a PKCE verifier (43 unreserved characters) and its S256 challenge.
fn generate_pkce_pair() -> PkcePair {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut rng = rand::rng();
    let verifier: String = (0..43)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    PkcePair { verifier, challenge }
}

/// Generate a random state parameter for CSRF protection.
fn generate_state() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Query parameters delivered to the callback listener
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Tears the callback listener down and releases the in-flight login flag.
struct ListenerGuard {
    server: tokio::task::JoinHandle<()>,
    active: Arc<AtomicBool>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.server.abort();
        self.active.store(false, Ordering::SeqCst);
    }
}

/// An in-flight login: listener bound, browser not necessarily opened yet
pub struct LoginAttempt {
    /// URL the user's browser must visit
    pub authorize_url: String,
    session_key: String,
    state: String,
    verifier: String,
    redirect_uri: String,
    rx: oneshot::Receiver<CallbackQuery>,
    _guard: ListenerGuard,
}

impl LoginAttempt {
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }
}

fn callback_router(
    tx: Arc<tokio::sync::Mutex<Option<oneshot::Sender<CallbackQuery>>>>,
) -> axum::Router {
    axum::Router::new().route(
        "/callback",
        axum::routing::get(move |query: axum::extract::Query<HashMap<String, String>>| {
            let tx = tx.clone();
            async move {
                let received = CallbackQuery {
                    code: query.get("code").cloned(),
                    state: query.get("state").cloned(),
                    error: query.get("error").cloned(),
                };
                if let Some(sender) = tx.lock().await.take() {
                    let _ = sender.send(received);
                }
                axum::response::Html(
                    "<!DOCTYPE html>\n<html>\n<head><title>Provena CLI</title></head>\n\
                     <body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\">\n\
                     <h2>Login complete</h2>\n\
                     <p>You can close this tab and return to the terminal.</p>\n\
                     </body>\n</html>",
                )
            }
        }),
    )
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Owns the login/logout/refresh lifecycle for registry credentials
pub struct AuthSession {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    http: reqwest::Client,
    login_active: Arc<AtomicBool>,
}

impl AuthSession {
    pub fn new(config: AuthConfig, store: Arc<dyn CredentialStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            config,
            store,
            http,
            login_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Start a login attempt: bind the callback listener and build the
    /// authorization URL for the user's browser.
    ///
    /// Rejects with `LoginInProgress` while another attempt is listening;
    /// replacing an in-flight listener would orphan the first browser tab
    /// and its state token.
    pub async fn begin_login(&self, session_key: &str) -> Result<LoginAttempt> {
        if self
            .login_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AuthError::LoginInProgress);
        }

        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                self.login_active.store(false, Ordering::SeqCst);
                return Err(AuthError::ListenerBindError(e.to_string()));
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                self.login_active.store(false, Ordering::SeqCst);
                return Err(AuthError::ListenerBindError(e.to_string()));
            }
        };

        let (tx, rx) = oneshot::channel::<CallbackQuery>();
        let tx = Arc::new(tokio::sync::Mutex::new(Some(tx)));
        let app = callback_router(tx);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        let guard = ListenerGuard {
            server,
            active: self.login_active.clone(),
        };

        let pkce = generate_pkce_pair();
        let state = generate_state();
        let redirect_uri = format!("http://127.0.0.1:{}/callback", port);

        let mut authorize_url = url::Url::parse(&self.config.authorize_url())
            .map_err(|e| AuthError::Exchange(format!("invalid authorize URL: {}", e)))?;
        authorize_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("scope", &self.config.scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        log::debug!("Login callback listener bound on port {}", port);

        Ok(LoginAttempt {
            authorize_url: authorize_url.into(),
            session_key: session_key.to_string(),
            state,
            verifier: pkce.verifier,
            redirect_uri,
            rx,
            _guard: guard,
        })
    }

    /// Await the browser redirect for an attempt, exchange the code, and
    /// store the resulting credential.
    ///
    /// The listener is torn down on every exit path. Only a successful
    /// exchange touches the credential store.
    pub async fn await_callback(
        &self,
        attempt: LoginAttempt,
        timeout: Duration,
    ) -> Result<Credential> {
        let LoginAttempt {
            session_key,
            state,
            verifier,
            redirect_uri,
            rx,
            _guard,
            ..
        } = attempt;

        let received = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| AuthError::Timeout)?
            .map_err(|_| AuthError::Exchange("callback channel closed".to_string()))?;

        if let Some(error) = received.error {
            return Err(AuthError::UserDenied(error));
        }
        if received.state.as_deref() != Some(state.as_str()) {
            return Err(AuthError::StateMismatch);
        }
        let code = received
            .code
            .ok_or_else(|| AuthError::Exchange("callback carried no authorization code".to_string()))?;

        log::debug!("Authorization code received, exchanging for tokens");
        let token = self.exchange_code(&code, &verifier, &redirect_uri).await?;
        let credential = self.credential_from_token(token, &session_key);
        self.store.put(&session_key, &credential)?;

        log::info!("Authenticated session '{}'", session_key);
        Ok(credential)
    }

    /// Return a credential guaranteed to be outside the refresh skew window,
    /// refreshing it in place when necessary.
    ///
    /// Never returns a stale credential: an expired token that cannot be
    /// refreshed clears the stored entry and signals `ReauthRequired`.
    pub async fn ensure_fresh(&self, session_key: &str) -> Result<Credential> {
        let credential = self
            .store
            .get(session_key)?
            .ok_or(AuthError::ReauthRequired)?;

        if !credential.expires_within(ChronoDuration::seconds(REFRESH_SKEW_SECS)) {
            return Ok(credential);
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            log::info!("Credential for '{}' expired with no refresh token", session_key);
            self.store.clear(session_key)?;
            return Err(AuthError::ReauthRequired);
        };

        match self.refresh(&refresh_token).await {
            Ok(mut token) => {
                if token.refresh_token.is_none() {
                    token.refresh_token = Some(refresh_token);
                }
                let refreshed = self.credential_from_token(token, session_key);
                self.store.put(session_key, &refreshed)?;
                log::debug!("Refreshed credential for '{}'", session_key);
                Ok(refreshed)
            }
            Err(e) => {
                log::warn!("Refresh failed for '{}': {}", session_key, e);
                self.store.clear(session_key)?;
                Err(AuthError::ReauthRequired)
            }
        }
    }

    /// Revoke the stored refresh token (best effort) and remove the
    /// credential. Local removal always succeeds from the caller's view.
    pub async fn logout(&self, session_key: &str) {
        let credential = self.store.get(session_key).ok().flatten();

        if let Some(refresh_token) = credential.and_then(|c| c.refresh_token) {
            if let Err(e) = self.revoke(&refresh_token).await {
                log::warn!("Token revocation failed (credential removed locally): {}", e);
            }
        }

        if let Err(e) = self.store.clear(session_key) {
            log::error!("Could not clear stored credential for '{}': {}", session_key, e);
        }
    }

    /// Authentication status for a session key.
    pub fn status(&self, session_key: &str) -> AuthStatus {
        match self.store.get(session_key) {
            Ok(credential) => AuthStatus::for_credential(credential.as_ref()),
            Err(_) => AuthStatus::NotAuthenticated,
        }
    }

    fn credential_from_token(&self, token: TokenResponse, session_key: &str) -> Credential {
        Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs as i64)),
            subject: session_key.to_string(),
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        let body = format!(
            "grant_type={}&code={}&redirect_uri={}&client_id={}&code_verifier={}",
            urlencoding::encode("authorization_code"),
            urlencoding::encode(code),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(verifier),
        );
        self.token_request(body).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let body = format!(
            "grant_type={}&refresh_token={}&client_id={}",
            urlencoding::encode("refresh_token"),
            urlencoding::encode(refresh_token),
            urlencoding::encode(&self.config.client_id),
        );
        self.token_request(body).await
    }

    async fn token_request(&self, body: String) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.config.token_url())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::Exchange(format!("HTTP {}: {}", status, text)));
        }

        serde_json::from_str(&text)
            .map_err(|e| AuthError::Exchange(format!("invalid token response: {}", e)))
    }

    async fn revoke(&self, refresh_token: &str) -> Result<()> {
        let body = format!(
            "token={}&token_type_hint=refresh_token&client_id={}",
            urlencoding::encode(refresh_token),
            urlencoding::encode(&self.config.client_id),
        );

        let response = self
            .http
            .post(self.config.revoke_url())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Exchange(format!(
                "revocation returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::MemoryStore;

    fn session() -> (AuthSession, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let session = AuthSession::new(AuthConfig::default(), store.clone());
        (session, store)
    }

    #[test]
    fn test_pkce_pair_shape() {
        let pair = generate_pkce_pair();
        assert_eq!(pair.verifier.len(), 43);

        let decoded = URL_SAFE_NO_PAD.decode(&pair.challenge).unwrap();
        assert_eq!(decoded.len(), 32);

        let mut hasher = Sha256::new();
        hasher.update(pair.verifier.as_bytes());
        assert_eq!(decoded, hasher.finalize().as_slice());
    }

    #[test]
    fn test_pkce_and_state_uniqueness() {
        assert_ne!(generate_pkce_pair().verifier, generate_pkce_pair().verifier);
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn test_error_terminal_phases() {
        assert_eq!(
            AuthError::UserDenied("access_denied".into()).terminal_phase(),
            LoginPhase::Denied
        );
        assert_eq!(AuthError::Timeout.terminal_phase(), LoginPhase::TimedOut);
        assert_eq!(AuthError::StateMismatch.terminal_phase(), LoginPhase::Error);
    }

    #[tokio::test]
    async fn test_begin_login_builds_authorize_url() {
        let (session, _) = session();
        let attempt = session.begin_login("default").await.unwrap();

        let url = url::Url::parse(&attempt.authorize_url).unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(params.get("client_id").map(String::as_str), Some("provena-cli"));
        assert_eq!(
            params.get("code_challenge_method").map(String::as_str),
            Some("S256")
        );
        assert!(params.get("state").is_some_and(|s| !s.is_empty()));
        assert!(
            params
                .get("redirect_uri")
                .is_some_and(|r| r.starts_with("http://127.0.0.1:"))
        );
    }

    #[tokio::test]
    async fn test_second_login_rejected_while_listening() {
        let (session, _) = session();
        let attempt = session.begin_login("default").await.unwrap();

        let second = session.begin_login("default").await;
        assert!(matches!(second, Err(AuthError::LoginInProgress)));

        // Dropping the attempt releases the flag and the listener.
        drop(attempt);
        assert!(session.begin_login("default").await.is_ok());
    }

    #[tokio::test]
    async fn test_state_mismatch_leaves_store_untouched() {
        let (session, store) = session();
        let attempt = session.begin_login("default").await.unwrap();
        let callback = format!("{}?code=abc&state=not-the-state", attempt.redirect_uri());

        let poke = tokio::spawn(async move {
            let _ = reqwest::get(callback).await;
        });

        let result = session
            .await_callback(attempt, Duration::from_secs(5))
            .await;
        poke.await.unwrap();

        assert!(matches!(result, Err(AuthError::StateMismatch)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_denied_callback() {
        let (session, store) = session();
        let attempt = session.begin_login("default").await.unwrap();
        let callback = format!("{}?error=access_denied", attempt.redirect_uri());

        let poke = tokio::spawn(async move {
            let _ = reqwest::get(callback).await;
        });

        let result = session
            .await_callback(attempt, Duration::from_secs(5))
            .await;
        poke.await.unwrap();

        match result {
            Err(e) => assert_eq!(e.terminal_phase(), LoginPhase::Denied),
            Ok(_) => panic!("denied callback must not authenticate"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_callback_timeout_releases_listener() {
        let (session, store) = session();
        let attempt = session.begin_login("default").await.unwrap();

        let result = session
            .await_callback(attempt, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(AuthError::Timeout)));
        assert!(store.is_empty());

        // The guard released the in-flight flag on the way out.
        assert!(session.begin_login("default").await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_fresh_passes_through_live_credential() {
        let (session, store) = session();
        let credential = Credential {
            access_token: "at-live".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
            subject: "default".to_string(),
        };
        store.put("default", &credential).unwrap();

        let fresh = session.ensure_fresh("default").await.unwrap();
        assert_eq!(fresh.access_token, "at-live");
    }

    #[tokio::test]
    async fn test_ensure_fresh_without_credential() {
        let (session, _) = session();
        let result = session.ensure_fresh("default").await;
        assert!(matches!(result, Err(AuthError::ReauthRequired)));
    }

    #[tokio::test]
    async fn test_ensure_fresh_expired_without_refresh_token_clears() {
        let (session, store) = session();
        let credential = Credential {
            access_token: "at-stale".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() - ChronoDuration::minutes(5)),
            subject: "default".to_string(),
        };
        store.put("default", &credential).unwrap();

        let result = session.ensure_fresh("default").await;
        assert!(matches!(result, Err(AuthError::ReauthRequired)));
        // The stale credential is gone, not returned.
        assert!(store.get("default").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_reporting() {
        let (session, store) = session();
        assert!(matches!(
            session.status("default"),
            AuthStatus::NotAuthenticated
        ));

        let credential = Credential {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
            subject: "default".to_string(),
        };
        store.put("default", &credential).unwrap();
        assert!(matches!(
            session.status("default"),
            AuthStatus::Authenticated { .. }
        ));
    }
}
