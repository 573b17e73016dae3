// Session and token lifecycle.
//
// `SessionTokenManager` is the single owner of the signed-in user's
// `TokenPair`. Other components read snapshots or ask it for a fresh
// access token; only sign-in, refresh and sign-out transition the state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{ApiError, AuthApi, IssuedTokens, RefreshedToken};
use crate::config::ClientConfig;
use crate::store::{SessionStore, StoreError};
use crate::token::{TokenClaims, TokenDecoder};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("not signed in")]
    NotAuthenticated,

    #[error("session expired, please log in again")]
    SessionExpired,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("authentication backend unavailable: {0}")]
    Transport(#[from] ApiError),
}

impl AuthError {
    // True when the user has to sign in again; false for transient
    // backend trouble during sign-in.
    pub fn requires_reauthentication(&self) -> bool {
        !matches!(self, AuthError::Transport(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    pub claims: TokenClaims,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub value: String,
    // Present when the refresh token is itself a decodable JWT.
    pub claims: Option<TokenClaims>,
}

// Access/refresh pair. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub subject: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub image_url: Option<String>,
}

impl UserProfile {
    pub fn from_claims(claims: &TokenClaims) -> Self {
        Self {
            id: claims.effective_user_id().to_string(),
            subject: claims.subject.clone(),
            name: claims.name.clone(),
            roles: claims.roles.clone(),
            image_url: claims.image_url.clone(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionErrorKind {
    RefreshFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: UserProfile,
    pub tokens: TokenPair,
    #[serde(default)]
    pub error: Option<SessionErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(Session),
    Refreshing(Session),
    // Refresh failed. The session is kept for display with `error` set;
    // its tokens are never handed out again.
    Expired(Session),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Unauthenticated => None,
            SessionState::Authenticated(s) | SessionState::Refreshing(s) | SessionState::Expired(s) => {
                Some(s)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Refreshing(_) => "refreshing",
            SessionState::Expired(_) => "expired",
        }
    }
}

#[derive(Debug, Default)]
struct SessionStats {
    sign_ins: AtomicUsize,
    sign_outs: AtomicUsize,
    refresh_exchanges: AtomicUsize,
    refresh_failures: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStatsReport {
    pub sign_ins: usize,
    pub sign_outs: usize,
    pub refresh_exchanges: usize,
    pub refresh_failures: usize,
}

pub struct SessionTokenManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn SessionStore>,
    decoder: TokenDecoder,
    leeway_secs: i64,
    state: RwLock<SessionState>,
    // Held for the whole refresh exchange: at most one in flight per session.
    refresh_gate: tokio::sync::Mutex<()>,
    stats: SessionStats,
}

impl SessionTokenManager {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn SessionStore>,
        decoder: TokenDecoder,
        leeway_secs: i64,
    ) -> Self {
        Self {
            api,
            store,
            decoder,
            leeway_secs,
            state: RwLock::new(SessionState::Unauthenticated),
            refresh_gate: tokio::sync::Mutex::new(()),
            stats: SessionStats::default(),
        }
    }

    pub fn from_config(
        config: &ClientConfig,
        api: Arc<dyn AuthApi>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::new(
            api,
            store,
            TokenDecoder::new(config.token_verification()),
            config.token_expiry_leeway_secs,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.read().session().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            *self.state.read(),
            SessionState::Authenticated(_) | SessionState::Refreshing(_)
        )
    }

    pub fn stats(&self) -> SessionStatsReport {
        SessionStatsReport {
            sign_ins: self.stats.sign_ins.load(Ordering::SeqCst),
            sign_outs: self.stats.sign_outs.load(Ordering::SeqCst),
            refresh_exchanges: self.stats.refresh_exchanges.load(Ordering::SeqCst),
            refresh_failures: self.stats.refresh_failures.load(Ordering::SeqCst),
        }
    }

    // Picks up a session persisted by an earlier run. Stale tokens are left
    // for the next `ensure_fresh_token` to refresh.
    pub fn restore(&self) -> Result<Option<Session>, StoreError> {
        let Some(mut session) = self.store.load()? else {
            return Ok(None);
        };
        session.error = None;

        let mut state = self.state.write();
        if !matches!(*state, SessionState::Unauthenticated) {
            return Ok(state.session().cloned());
        }
        tracing::info!(user_id = %session.user.id, "restored persisted session");
        *state = SessionState::Authenticated(session.clone());
        Ok(Some(session))
    }

    pub async fn authenticate_with_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let issued = self
            .api
            .login(email, password)
            .await
            .map_err(Self::sign_in_error)?;
        self.establish(issued)
    }

    // Federated sign-in: exchanges a third-party identity token.
    pub async fn authenticate_with_provider(&self, id_token: &str) -> Result<Session, AuthError> {
        let issued = self
            .api
            .google_login(id_token)
            .await
            .map_err(Self::sign_in_error)?;
        self.establish(issued)
    }

    // Returns a pair whose access token is not stale, refreshing it first
    // if needed. Concurrent callers share a single refresh exchange.
    pub async fn ensure_fresh_token(&self) -> Result<TokenPair, AuthError> {
        if let Some(tokens) = self.fresh_tokens()? {
            return Ok(tokens);
        }

        let _gate = self.refresh_gate.lock().await;

        // Whoever held the gate before us may already have refreshed.
        if let Some(tokens) = self.fresh_tokens()? {
            return Ok(tokens);
        }

        let Some(stale) = self.begin_refresh() else {
            return self.fresh_tokens()?.ok_or(AuthError::SessionExpired);
        };
        let mut pending = PendingRefresh {
            state: &self.state,
            stale: Some(stale.clone()),
        };

        self.stats.refresh_exchanges.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(user_id = %stale.user.id, "access token stale, refreshing");

        let outcome = self.exchange_refresh(&stale).await;
        pending.disarm();
        if outcome.is_err() {
            self.stats.refresh_failures.fetch_add(1, Ordering::SeqCst);
        }

        let mut state = self.state.write();
        if !matches!(*state, SessionState::Refreshing(_)) {
            // signed out or signed in again while the exchange ran
            drop(state);
            tracing::debug!("session changed during refresh, exchange result discarded");
            return self.fresh_tokens()?.ok_or(AuthError::SessionExpired);
        }

        match outcome {
            Ok(renewed) => {
                *state = SessionState::Authenticated(renewed.clone());
                self.persist(&renewed);
                drop(state);
                tracing::info!(user_id = %renewed.user.id, "access token refreshed");
                Ok(renewed.tokens)
            }
            Err(reason) => {
                let mut expired = stale;
                expired.error = Some(SessionErrorKind::RefreshFailed);
                *state = SessionState::Expired(expired);
                if let Err(e) = self.store.clear() {
                    tracing::warn!(error = %e, "failed to clear persisted session");
                }
                drop(state);
                tracing::warn!(%reason, "token refresh failed, re-authentication required");
                Err(AuthError::RefreshFailed(reason))
            }
        }
    }

    // Bearer value for an authenticated backend call.
    pub async fn authorized_token(&self) -> Result<String, AuthError> {
        self.ensure_fresh_token()
            .await
            .map(|tokens| tokens.access_token.value)
    }

    // Local sign-out always succeeds; the backend is told on a best-effort basis.
    pub async fn sign_out(&self) {
        let previous = {
            let mut state = self.state.write();
            if let Err(e) = self.store.clear() {
                tracing::warn!(error = %e, "failed to clear persisted session");
            }
            std::mem::replace(&mut *state, SessionState::Unauthenticated)
        };
        self.stats.sign_outs.fetch_add(1, Ordering::SeqCst);

        if let Some(session) = previous.session() {
            let tokens = &session.tokens;
            if let Err(e) = self
                .api
                .logout(&tokens.access_token.value, &tokens.refresh_token.value)
                .await
            {
                tracing::warn!(error = %e, "backend logout failed, continuing with local sign-out");
            }
            tracing::info!(user_id = %session.user.id, "signed out");
        }
    }

    fn sign_in_error(err: ApiError) -> AuthError {
        match err {
            ApiError::ApiResponseError { .. } => AuthError::InvalidCredentials,
            other => AuthError::Transport(other),
        }
    }

    fn establish(&self, issued: IssuedTokens) -> Result<Session, AuthError> {
        let claims = self.decoder.decode(&issued.access_token)?;
        let session = Session {
            user: UserProfile::from_claims(&claims),
            tokens: TokenPair {
                access_token: AccessToken {
                    value: issued.access_token,
                    claims,
                },
                refresh_token: self.refresh_token(issued.refresh_token),
            },
            error: None,
        };

        {
            let mut state = self.state.write();
            *state = SessionState::Authenticated(session.clone());
            self.persist(&session);
        }
        self.stats.sign_ins.fetch_add(1, Ordering::SeqCst);
        tracing::info!(user_id = %session.user.id, roles = ?session.user.roles, "signed in");
        Ok(session)
    }

    fn refresh_token(&self, value: String) -> RefreshToken {
        // refresh tokens may be opaque strings
        let claims = self.decoder.decode(&value).ok();
        RefreshToken { value, claims }
    }

    fn fresh_tokens(&self) -> Result<Option<TokenPair>, AuthError> {
        match &*self.state.read() {
            SessionState::Unauthenticated => Err(AuthError::NotAuthenticated),
            SessionState::Expired(_) => Err(AuthError::SessionExpired),
            SessionState::Authenticated(session) | SessionState::Refreshing(session) => {
                if session.tokens.access_token.claims.is_expired(self.leeway_secs) {
                    Ok(None)
                } else {
                    Ok(Some(session.tokens.clone()))
                }
            }
        }
    }

    fn begin_refresh(&self) -> Option<Session> {
        let mut state = self.state.write();
        match &*state {
            SessionState::Authenticated(session) => {
                let session = session.clone();
                *state = SessionState::Refreshing(session.clone());
                Some(session)
            }
            _ => None,
        }
    }

    async fn exchange_refresh(&self, stale: &Session) -> Result<Session, String> {
        let RefreshedToken {
            access_token,
            refresh_token,
        } = self
            .api
            .refresh(&stale.tokens.refresh_token.value)
            .await
            .map_err(|e| e.to_string())?;

        // An unverifiable token is treated like a failed exchange.
        let claims = self.decoder.decode(&access_token).map_err(|e| e.to_string())?;

        Ok(Session {
            user: UserProfile::from_claims(&claims),
            tokens: TokenPair {
                access_token: AccessToken {
                    value: access_token,
                    claims,
                },
                refresh_token: match refresh_token {
                    Some(value) => self.refresh_token(value),
                    None => stale.tokens.refresh_token.clone(),
                },
            },
            error: None,
        })
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save(session) {
            tracing::warn!(error = %e, "failed to persist session");
        }
    }
}

// Hands a stale session back when the caller stops waiting mid-exchange,
// so the next caller can start a new one.
struct PendingRefresh<'a> {
    state: &'a RwLock<SessionState>,
    stale: Option<Session>,
}

impl PendingRefresh<'_> {
    fn disarm(&mut self) {
        self.stale = None;
    }
}

impl Drop for PendingRefresh<'_> {
    fn drop(&mut self) {
        let Some(stale) = self.stale.take() else {
            return;
        };
        let mut state = self.state.write();
        if matches!(*state, SessionState::Refreshing(_)) {
            tracing::debug!(user_id = %stale.user.id, "refresh abandoned by caller");
            *state = SessionState::Authenticated(stale);
        }
    }
}
