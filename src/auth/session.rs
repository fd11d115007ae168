//! Authenticated session: owns the credential and refreshes it on demand.
//!
//! # Concurrency
//!
//! Refreshes are single-flight. A caller arriving while a refresh is in
//! progress waits for it and receives the same outcome instead of issuing a
//! second token request.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::Credential;

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Token endpoint able to refresh and revoke credentials.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchanges the refresh token of `credential` for a new credential.
    ///
    /// Returns [`Error::InvalidAuth`] for an invalid or revoked refresh token.
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;

    /// Invalidates the tokens of `credential` server-side.
    async fn revoke(&self, credential: &Credential) -> Result<()>;
}

/// Persistence hook invoked whenever the credential changes.
///
/// `None` means the credential was revoked and should be forgotten.
pub trait TokenStore: Send + Sync {
    /// Saves (or clears) the credential.
    fn save(&self, credential: Option<&Credential>);
}

impl<F> TokenStore for F
where
    F: Fn(Option<&Credential>) + Send + Sync,
{
    fn save(&self, credential: Option<&Credential>) {
        self(credential);
    }
}

// ============================================================================
// RefreshOutcome
// ============================================================================

/// Cloneable record of the last refresh, replayed to waiting callers.
#[derive(Debug, Clone)]
enum RefreshOutcome {
    Refreshed,
    InvalidAuth(String),
    Failed(String),
}

impl RefreshOutcome {
    fn of(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::Refreshed,
            Err(Error::InvalidAuth { message }) => Self::InvalidAuth(message.clone()),
            Err(other) => Self::Failed(other.to_string()),
        }
    }

    fn into_result(self) -> Result<()> {
        match self {
            Self::Refreshed => Ok(()),
            Self::InvalidAuth(message) => Err(Error::invalid_auth(message)),
            Self::Failed(message) => Err(Error::connection(message)),
        }
    }
}

// ============================================================================
// AuthSession
// ============================================================================

/// Owns a [`Credential`] and keeps it fresh.
///
/// Shared between the handshake (which needs a valid token on every
/// (re)connect) and the application.
pub struct AuthSession {
    /// Current credential, `None` after revoke.
    credential: RwLock<Option<Credential>>,
    /// Token endpoint used for refresh/revoke.
    endpoint: Option<Arc<dyn TokenEndpoint>>,
    /// Persistence hook.
    store: Option<Arc<dyn TokenStore>>,
    /// Serializes refreshes.
    refresh_lock: tokio::sync::Mutex<()>,
    /// Bumped after every completed refresh attempt.
    refresh_generation: AtomicU64,
    /// Outcome of the most recent refresh attempt.
    last_outcome: Mutex<Option<RefreshOutcome>>,
    /// Set when a refresh produced a non-increasing expiry.
    unusable: AtomicBool,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("hass_url", &self.hass_url())
            .field("has_endpoint", &self.endpoint.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AuthSession - Constructors
// ============================================================================

impl AuthSession {
    /// Creates a session with no refresh capability.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
            endpoint: None,
            store: None,
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
            unusable: AtomicBool::new(false),
        }
    }

    /// Sets the token endpoint used for refresh and revoke.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Sets the persistence hook.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }
}

// ============================================================================
// AuthSession - Public API
// ============================================================================

impl AuthSession {
    /// Returns a snapshot of the current credential.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().clone()
    }

    /// Returns the issuing server URL, empty after revoke.
    #[must_use]
    pub fn hass_url(&self) -> String {
        self.credential
            .read()
            .as_ref()
            .map(|c| c.hass_url.clone())
            .unwrap_or_default()
    }

    /// Returns `true` if the access token has expired (or was revoked).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.credential
            .read()
            .as_ref()
            .is_none_or(Credential::is_expired)
    }

    /// Returns the access token, refreshing first if it has expired.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAuth`] if the session was revoked or became unusable
    /// - any error from [`refresh`](Self::refresh)
    pub async fn access_token(&self) -> Result<String> {
        self.ensure_usable()?;

        if self.is_expired() {
            self.refresh().await?;
        }

        self.credential
            .read()
            .as_ref()
            .map(|c| c.access_token.clone())
            .ok_or_else(|| Error::invalid_auth("Session revoked"))
    }

    /// Exchanges the refresh token for a new credential.
    ///
    /// Concurrent callers share one in-flight refresh.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRefreshToken`] if the credential cannot be refreshed
    /// - [`Error::InvalidAuth`] if the endpoint rejects the refresh token, or
    ///   the new credential does not extend the expiry
    /// - [`Error::Config`] if no token endpoint is configured
    pub async fn refresh(&self) -> Result<()> {
        let observed = self.refresh_generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.refresh_generation.load(Ordering::Acquire) != observed {
            debug!("Joined in-flight token refresh");
            return self
                .last_outcome
                .lock()
                .clone()
                .map_or(Ok(()), RefreshOutcome::into_result);
        }

        let result = self.refresh_locked().await;
        *self.last_outcome.lock() = Some(RefreshOutcome::of(&result));
        self.refresh_generation.fetch_add(1, Ordering::Release);
        result
    }

    /// Revokes the tokens server-side and clears local state.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRefreshToken`] if there is nothing to revoke
    /// - [`Error::Config`] if no token endpoint is configured
    pub async fn revoke(&self) -> Result<()> {
        let credential = self
            .credential()
            .filter(Credential::has_refresh_token)
            .ok_or(Error::NoRefreshToken)?;
        let endpoint = self.endpoint()?;

        endpoint.revoke(&credential).await?;

        *self.credential.write() = None;
        if let Some(store) = &self.store {
            store.save(None);
        }

        info!(hass_url = %credential.hass_url, "Tokens revoked");
        Ok(())
    }
}

// ============================================================================
// AuthSession - Internal
// ============================================================================

impl AuthSession {
    fn endpoint(&self) -> Result<&Arc<dyn TokenEndpoint>> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| Error::config("No token endpoint configured"))
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.unusable.load(Ordering::Acquire) {
            return Err(Error::invalid_auth("Session unusable"));
        }
        Ok(())
    }

    async fn refresh_locked(&self) -> Result<()> {
        self.ensure_usable()?;

        let current = self
            .credential()
            .ok_or_else(|| Error::invalid_auth("Session revoked"))?;
        if !current.has_refresh_token() {
            return Err(Error::NoRefreshToken);
        }
        let endpoint = self.endpoint()?;

        debug!(hass_url = %current.hass_url, "Refreshing access token");
        let mut next = endpoint.refresh(&current).await?;

        if next.expires <= current.expires {
            warn!(
                previous = %current.expires,
                next = %next.expires,
                "Refreshed credential does not extend expiry"
            );
            self.unusable.store(true, Ordering::Release);
            return Err(Error::invalid_auth("Refreshed credential expiry did not advance"));
        }

        // The endpoint does not return the refresh token again.
        if next.refresh_token.is_empty() {
            next.refresh_token.clone_from(&current.refresh_token);
        }

        if let Some(store) = &self.store {
            store.save(Some(&next));
        }
        *self.credential.write() = Some(next);

        debug!("Access token refreshed");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    /// Endpoint that counts calls and returns a credential valid for an hour.
    struct CountingEndpoint {
        refreshes: AtomicUsize,
        revokes: AtomicUsize,
        reject: bool,
        delay: Duration,
    }

    impl CountingEndpoint {
        fn new() -> Self {
            Self {
                refreshes: AtomicUsize::new(0),
                revokes: AtomicUsize::new(0),
                reject: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TokenEndpoint for CountingEndpoint {
        async fn refresh(&self, credential: &Credential) -> Result<Credential> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.reject {
                return Err(Error::invalid_auth("refresh token revoked"));
            }
            Ok(Credential::new(
                credential.hass_url.clone(),
                credential.client_id.clone(),
                "fresh-token",
                3600,
                "",
            ))
        }

        async fn revoke(&self, _credential: &Credential) -> Result<()> {
            self.revokes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn expired() -> Credential {
        Credential::new("http://h", Some("c".into()), "stale-token", -60, "refresh")
    }

    #[tokio::test]
    async fn test_valid_token_is_returned_without_refresh() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let session = AuthSession::new(Credential::long_lived("http://h", "t"))
            .with_endpoint(endpoint.clone());

        assert_eq!(session.access_token().await.expect("token"), "t");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_saved() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let saved = Arc::new(Mutex::new(Vec::<Option<Credential>>::new()));
        let saved_clone = Arc::clone(&saved);
        let store = move |c: Option<&Credential>| saved_clone.lock().push(c.cloned());

        let session = AuthSession::new(expired())
            .with_endpoint(endpoint.clone())
            .with_store(Arc::new(store));

        assert_eq!(session.access_token().await.expect("token"), "fresh-token");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);

        let saved = saved.lock();
        assert_eq!(saved.len(), 1);
        let stored = saved[0].as_ref().expect("saved credential");
        assert_eq!(stored.refresh_token, "refresh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_is_single_flight() {
        let endpoint = Arc::new(CountingEndpoint {
            delay: Duration::from_millis(100),
            ..CountingEndpoint::new()
        });
        let session = Arc::new(AuthSession::new(expired()).with_endpoint(endpoint.clone()));

        let a = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.access_token().await }
        });
        let b = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.access_token().await }
        });

        assert_eq!(a.await.expect("join").expect("token"), "fresh-token");
        assert_eq!(b.await.expect("join").expect("token"), "fresh-token");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_share_failed_outcome() {
        let endpoint = Arc::new(CountingEndpoint {
            reject: true,
            delay: Duration::from_millis(50),
            ..CountingEndpoint::new()
        });
        let session = Arc::new(AuthSession::new(expired()).with_endpoint(endpoint.clone()));

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.refresh().await }
        });
        let second = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.refresh().await }
        });

        let first = first.await.expect("join");
        let second = second.await.expect("join");
        assert!(matches!(first, Err(Error::InvalidAuth { .. })));
        assert!(matches!(second, Err(Error::InvalidAuth { .. })));
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let session = AuthSession::new(Credential::long_lived("http://h", "t"))
            .with_endpoint(Arc::new(CountingEndpoint::new()));
        assert!(matches!(session.refresh().await, Err(Error::NoRefreshToken)));
    }

    #[tokio::test]
    async fn test_non_advancing_expiry_makes_session_unusable() {
        struct StaleEndpoint;

        #[async_trait]
        impl TokenEndpoint for StaleEndpoint {
            async fn refresh(&self, credential: &Credential) -> Result<Credential> {
                let mut next = credential.clone();
                next.expires = credential.expires - ChronoDuration::seconds(1);
                Ok(next)
            }

            async fn revoke(&self, _credential: &Credential) -> Result<()> {
                Ok(())
            }
        }

        let session = AuthSession::new(expired()).with_endpoint(Arc::new(StaleEndpoint));
        assert!(matches!(session.refresh().await, Err(Error::InvalidAuth { .. })));
        assert!(matches!(
            session.access_token().await,
            Err(Error::InvalidAuth { .. })
        ));
    }

    #[tokio::test]
    async fn test_revoke_clears_state() {
        let endpoint = Arc::new(CountingEndpoint::new());
        let cleared = Arc::new(AtomicBool::new(false));
        let cleared_clone = Arc::clone(&cleared);
        let store = move |c: Option<&Credential>| {
            if c.is_none() {
                cleared_clone.store(true, Ordering::SeqCst);
            }
        };

        let session = AuthSession::new(Credential::new("http://h", None, "t", 3600, "r"))
            .with_endpoint(endpoint.clone())
            .with_store(Arc::new(store));

        session.revoke().await.expect("revoke");
        assert_eq!(endpoint.revokes.load(Ordering::SeqCst), 1);
        assert!(cleared.load(Ordering::SeqCst));
        assert!(session.credential().is_none());
        assert!(matches!(
            session.access_token().await,
            Err(Error::InvalidAuth { .. })
        ));
    }
}
