use crate::application_port::BackendError;
use crate::domain_model::{Provider, Session, User};

/// Outcome of a sign-in or sign-out attempt that did not succeed.
///
/// Cancellation is a normal user action and is kept apart from backend
/// failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("OAuth flow was cancelled")]
    Cancelled,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl AuthFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AuthFailure::Cancelled)
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_in(&self, provider: Provider) -> Result<Session, AuthFailure>;
    async fn sign_out(&self) -> Result<(), AuthFailure>;
    /// Cached user if fresh, otherwise fetched from the backend and cached.
    async fn current_user(&self) -> Result<Option<User>, BackendError>;
}
