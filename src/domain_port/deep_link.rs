use crate::domain_port::Subscription;

/// URL path segment that marks an OAuth callback deep link.
pub const AUTH_CALLBACK_MARKER: &str = "auth/callback";

#[async_trait::async_trait]
pub trait DeepLinkSource: Send + Sync {
    /// URL the app was opened with, if any.
    async fn initial_url(&self) -> Option<String>;

    /// URLs received while the app is running.
    fn subscribe(&self) -> Subscription<String>;
}

pub fn is_auth_callback(url: &str) -> bool {
    url.contains(AUTH_CALLBACK_MARKER)
}
