use crate::application_port::BackendError;
use crate::domain_model::*;
use crate::domain_port::Subscription;
use url::Url;

/// The backend auth client. It owns the session: storing, refreshing and
/// persisting it all happen behind this trait.
#[async_trait::async_trait]
pub trait AuthClient: Send + Sync {
    /// Authorization URL for `provider` that redirects back to `redirect_to`.
    fn authorize_url(&self, provider: Provider, redirect_to: &str) -> Result<Url, BackendError>;

    /// Turns an OAuth callback URL into a session and makes it current.
    async fn exchange_callback(&self, callback_url: &str) -> Result<Session, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    /// User of the current session, `None` when signed out.
    async fn get_user(&self) -> Result<Option<User>, BackendError>;

    async fn refresh_session(&self) -> Result<Session, BackendError>;

    async fn session(&self) -> Option<Session>;

    fn on_auth_state_change(&self) -> Subscription<AuthStateChange>;
}
