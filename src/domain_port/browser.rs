use crate::application_port::BackendError;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserResult {
    /// The browser reached the redirect URL; `url` carries the callback params.
    Success { url: String },
    /// The user closed the session.
    Cancel,
    /// The session ended without a redirect (e.g. timed out).
    Dismiss,
}

#[async_trait::async_trait]
pub trait Browser: Send + Sync {
    /// App URL for `path` that the browser session redirects back to.
    fn redirect_url(&self, path: &str) -> String;

    async fn open_auth_session(
        &self,
        auth_url: &Url,
        redirect_url: &str,
    ) -> Result<BrowserResult, BackendError>;
}
