use crate::application_port::BackendError;
use crate::domain_model::*;
use crate::domain_port::*;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use url::Url;

const EVENT_CAP: usize = 32;

/// Auth backend double. Any callback URL carrying an `access_token` or `code`
/// signs in the configured user.
pub struct FakeAuthClient {
    user: User,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthStateChange>,
    exchanges: AtomicUsize,
    user_fetches: AtomicUsize,
    fail_sign_out: AtomicBool,
    fail_get_user: AtomicUsize,
}

impl FakeAuthClient {
    pub fn new(user: User) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAP);
        FakeAuthClient {
            user,
            session: Mutex::new(None),
            events,
            exchanges: AtomicUsize::new(0),
            user_fetches: AtomicUsize::new(0),
            fail_sign_out: AtomicBool::new(false),
            fail_get_user: AtomicUsize::new(0),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// Number of callback exchanges that reached the backend.
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn user_fetches(&self) -> usize {
        self.user_fetches.load(Ordering::SeqCst)
    }

    pub fn set_fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// The next `times` calls to `get_user` fail with a network error.
    pub fn fail_get_user(&self, times: usize) {
        self.fail_get_user.store(times, Ordering::SeqCst);
    }

    /// Emits an event as if the backend changed the session on its own.
    pub fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let _ = self.events.send(AuthStateChange::new(event, session));
    }

    fn replace_session(&self, session: Option<Session>) -> Result<(), BackendError> {
        let mut slot = self
            .session
            .lock()
            .map_err(|e| BackendError::network(e.to_string()))?;
        *slot = session;
        Ok(())
    }

    fn current(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait::async_trait]
impl AuthClient for FakeAuthClient {
    fn authorize_url(&self, provider: Provider, redirect_to: &str) -> Result<Url, BackendError> {
        Url::parse_with_params(
            "https://auth.fake/authorize",
            &[("provider", provider.as_str()), ("redirect_to", redirect_to)],
        )
        .map_err(|e| BackendError::validation("invalid authorize url").with_cause(e))
    }

    async fn exchange_callback(&self, callback_url: &str) -> Result<Session, BackendError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let params = CallbackParams::parse(callback_url)
            .map_err(|e| BackendError::validation("invalid callback url").with_cause(e))?;
        if let Some(error) = params.error() {
            return Err(BackendError::auth_provider(error));
        }
        let token = params
            .get("access_token")
            .or_else(|| params.get("code"))
            .ok_or_else(|| BackendError::not_found("No session found"))?;

        let session = Session::new(token, format!("refresh-{}", token), 3600, self.user.clone());
        self.replace_session(Some(session.clone()))?;
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(BackendError::network("sign out request failed"));
        }
        self.replace_session(None)?;
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn get_user(&self) -> Result<Option<User>, BackendError> {
        self.user_fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_get_user
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackendError::network("user request failed"));
        }
        Ok(self.current().map(|s| s.user))
    }

    async fn refresh_session(&self) -> Result<Session, BackendError> {
        let current = self
            .current()
            .ok_or_else(|| BackendError::auth_provider("Auth session missing"))?;
        let refreshed = Session::new(
            format!("{}+", current.access_token),
            current.refresh_token.clone(),
            3600,
            current.user.clone(),
        );
        self.replace_session(Some(refreshed.clone()))?;
        self.emit(AuthChangeEvent::TokenRefreshed, Some(refreshed.clone()));
        Ok(refreshed)
    }

    async fn session(&self) -> Option<Session> {
        self.current()
    }

    fn on_auth_state_change(&self) -> Subscription<AuthStateChange> {
        Subscription::new("auth-state", self.events.subscribe())
    }
}
