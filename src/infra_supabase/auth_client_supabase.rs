use super::rest::{AuthFlow, SupabaseConfig, check, send_json};
use crate::application_port::BackendError;
use crate::domain_model::*;
use crate::domain_port::*;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub const SESSION_STORAGE_KEY: &str = "sb-auth-token";

const EVENT_CAP: usize = 64;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const VERIFIER_LEN: usize = 64;

/// GoTrue client. Holds the current session, persists it in durable storage
/// and broadcasts every change.
///
/// Sign-in, refresh and sign-out hold `session_lock` from the first read of
/// the session to the last write, so a refresh in flight cannot bring back a
/// session that was signed out meanwhile.
pub struct SupabaseAuthClient {
    http: reqwest::Client,
    config: SupabaseConfig,
    storage: Arc<dyn DurableStorage>,
    session_lock: AsyncMutex<()>,
    session: RwLock<Option<Session>>,
    code_verifier: Mutex<Option<String>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl SupabaseAuthClient {
    pub fn new(
        config: SupabaseConfig,
        storage: Arc<dyn DurableStorage>,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAP);
        Ok(SupabaseAuthClient {
            http,
            config,
            storage,
            session_lock: AsyncMutex::new(()),
            session: RwLock::new(None),
            code_verifier: Mutex::new(None),
            events,
        })
    }

    /// Loads the persisted session, refreshing it first when it is about to
    /// expire, and emits `INITIAL_SESSION`. Only a rejected refresh token
    /// drops the stored session; other failures keep it for the next
    /// refresh attempt.
    pub async fn initialize(&self, margin: chrono::Duration) -> Option<Session> {
        let _guard = self.session_lock.lock().await;
        let restored = self.load_persisted().await;
        let session = match restored {
            Some(session) if session.expires_within(Utc::now(), margin) => {
                *self.session.write().await = Some(session.clone());
                match self.refresh_locked().await {
                    Ok(session) => Some(session),
                    Err(e @ BackendError::AuthProvider { .. }) => {
                        warn!("stored session was rejected: {}", e);
                        self.store_session(None).await;
                        None
                    }
                    Err(e) => {
                        warn!("stored session could not be refreshed yet: {}", e);
                        Some(session)
                    }
                }
            }
            other => {
                *self.session.write().await = other.clone();
                other
            }
        };
        info!(signed_in = session.is_some(), "auth client initialized");
        self.emit(AuthChangeEvent::InitialSession, session.clone());
        session
    }

    /// Refreshes the session whenever it gets within `margin` of expiry.
    /// A rejected refresh token ends the session.
    pub async fn run_auto_refresh(
        self: Arc<Self>,
        tick: Duration,
        margin: chrono::Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let due = self
                .session
                .read()
                .await
                .as_ref()
                .is_some_and(|s| s.expires_within(Utc::now(), margin));
            if !due {
                continue;
            }
            let _guard = self.session_lock.lock().await;
            // a sign-out may have won the lock
            let still_due = self
                .session
                .read()
                .await
                .as_ref()
                .is_some_and(|s| s.expires_within(Utc::now(), margin));
            if !still_due {
                continue;
            }
            match self.refresh_locked().await {
                Ok(session) => debug!(expires_at = ?session.expires_at(), "session refreshed"),
                Err(e @ BackendError::AuthProvider { .. }) => {
                    warn!("refresh token rejected, ending session: {}", e);
                    self.store_session(None).await;
                    self.emit(AuthChangeEvent::SignedOut, None);
                }
                Err(e) => warn!("session refresh failed, retrying next tick: {}", e),
            }
        }
        debug!("auto refresh stopped");
    }

    async fn load_persisted(&self) -> Option<Session> {
        let raw = match self.storage.get_item(SESSION_STORAGE_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("failed to read stored session: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("discarding unreadable stored session: {}", e);
                None
            }
        }
    }

    /// Replaces the in-memory session and mirrors it to durable storage.
    async fn store_session(&self, session: Option<Session>) {
        let persisted = match &session {
            Some(session) => match serde_json::to_string(session) {
                Ok(raw) => self.storage.set_item(SESSION_STORAGE_KEY, &raw).await,
                Err(e) => {
                    warn!("failed to serialize session: {}", e);
                    Ok(())
                }
            },
            None => self.storage.remove_item(SESSION_STORAGE_KEY).await,
        };
        if let Err(e) = persisted {
            warn!("failed to persist session: {}", e);
        }
        *self.session.write().await = session;
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        // no listeners is fine
        let _ = self.events.send(AuthStateChange::new(event, session));
    }

    fn take_verifier(&self) -> Result<Option<String>, BackendError> {
        let mut slot = self
            .code_verifier
            .lock()
            .map_err(|e| BackendError::auth_provider(e.to_string()))?;
        Ok(slot.take())
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, BackendError> {
        let request = self.http.get(self.config.endpoint("auth/v1/user")?);
        let request = self
            .config
            .authorize(request, self.config.anon_key(), access_token);
        send_json(request).await
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, BackendError> {
        let mut url = self.config.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        let request = self.http.post(url).json(&body);
        let request = self
            .config
            .authorize(request, self.config.anon_key(), self.config.anon_key());
        let session: Session = send_json(request).await.map_err(grant_error)?;
        Ok(session.stamped(Utc::now()))
    }

    async fn session_from_fragment(&self, params: &CallbackParams) -> Result<Session, BackendError> {
        let (Some(access_token), Some(refresh_token), Some(expires_in)) = (
            params.get("access_token"),
            params.get("refresh_token"),
            params.get("expires_in"),
        ) else {
            return Err(BackendError::not_found("No session found"));
        };
        let expires_in: i64 = expires_in
            .parse()
            .map_err(|e| BackendError::validation("invalid expires_in").with_cause(e))?;

        let user = self.fetch_user(access_token).await?;
        let mut session = Session::new(access_token, refresh_token, expires_in, user);
        if let Some(token_type) = params.get("token_type") {
            session.token_type = token_type.to_string();
        }
        if let Some(expires_at) = params.get("expires_at").and_then(|v| v.parse().ok()) {
            session.expires_at = Some(expires_at);
        }
        Ok(session)
    }

    /// Refresh-token grant. Callers hold `session_lock`.
    async fn refresh_locked(&self) -> Result<Session, BackendError> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or_else(|| BackendError::auth_provider("Auth session missing"))?;

        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        self.store_session(Some(session.clone())).await;
        self.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    async fn session_from_code(&self, code: &str) -> Result<Session, BackendError> {
        let verifier = self
            .take_verifier()?
            .ok_or_else(|| BackendError::auth_provider("PKCE code verifier not found"))?;
        self.token_grant(
            "pkce",
            json!({ "auth_code": code, "code_verifier": verifier }),
        )
        .await
    }
}

/// Token grants fail with 400 on a bad code or refresh token; that is an auth
/// failure, not a malformed request.
fn grant_error(error: BackendError) -> BackendError {
    match error {
        BackendError::Validation { message, cause } => BackendError::AuthProvider { message, cause },
        other => other,
    }
}

pub(crate) fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[async_trait::async_trait]
impl AuthClient for SupabaseAuthClient {
    fn authorize_url(&self, provider: Provider, redirect_to: &str) -> Result<Url, BackendError> {
        let mut url = self.config.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to);

        if self.config.flow == AuthFlow::Pkce {
            let verifier = nanoid::nanoid!(VERIFIER_LEN);
            url.query_pairs_mut()
                .append_pair("code_challenge", &code_challenge(&verifier))
                .append_pair("code_challenge_method", "s256");
            let mut slot = self
                .code_verifier
                .lock()
                .map_err(|e| BackendError::auth_provider(e.to_string()))?;
            *slot = Some(verifier);
        }
        Ok(url)
    }

    async fn exchange_callback(&self, callback_url: &str) -> Result<Session, BackendError> {
        let params = CallbackParams::parse(callback_url)
            .map_err(|e| BackendError::validation("invalid callback url").with_cause(e))?;
        if let Some(error) = params.error() {
            return Err(BackendError::auth_provider(error));
        }

        let _guard = self.session_lock.lock().await;
        let session = match params.get("code") {
            Some(code) => self.session_from_code(code).await?,
            None => self.session_from_fragment(&params).await?,
        };
        self.store_session(Some(session.clone())).await;
        info!(user = %session.user.id, "signed in");
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let _guard = self.session_lock.lock().await;
        let access_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone());

        if let Some(access_token) = access_token {
            let mut url = self.config.endpoint("auth/v1/logout")?;
            url.query_pairs_mut().append_pair("scope", "global");
            let request = self.http.post(url);
            let request = self
                .config
                .authorize(request, self.config.anon_key(), &access_token);
            match check(request.send().await?).await {
                Ok(_) => {}
                // the server already forgot this session
                Err(BackendError::AuthProvider { .. } | BackendError::NotFound { .. }) => {
                    debug!("session was already gone on the server");
                }
                Err(e) => return Err(e),
            }
        }

        self.store_session(None).await;
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn get_user(&self) -> Result<Option<User>, BackendError> {
        let access_token = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => return Ok(None),
        };
        Ok(Some(self.fetch_user(&access_token).await?))
    }

    async fn refresh_session(&self) -> Result<Session, BackendError> {
        let _guard = self.session_lock.lock().await;
        self.refresh_locked().await
    }

    async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    fn on_auth_state_change(&self) -> Subscription<AuthStateChange> {
        Subscription::new("auth-state", self.events.subscribe())
    }
}
