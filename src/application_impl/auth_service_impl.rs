use super::callback_exchange::{CallbackExchange, cache_user};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::query_cache::QueryCache;
use std::sync::Arc;
use tracing::{error, info};

const CALLBACK_PATH: &str = "auth/callback";

/// OAuth sign-in through an external browser, sign-out, and the cached
/// current user.
pub struct OAuthAuthService {
    auth_client: Arc<dyn AuthClient>,
    browser: Arc<dyn Browser>,
    exchange: Arc<CallbackExchange>,
    cache: Arc<QueryCache>,
}

impl OAuthAuthService {
    pub fn new(
        auth_client: Arc<dyn AuthClient>,
        browser: Arc<dyn Browser>,
        exchange: Arc<CallbackExchange>,
        cache: Arc<QueryCache>,
    ) -> Self {
        OAuthAuthService {
            auth_client,
            browser,
            exchange,
            cache,
        }
    }

    async fn run_flow(&self, provider: Provider) -> Result<Session, AuthFailure> {
        let redirect_url = self.browser.redirect_url(CALLBACK_PATH);
        let auth_url = self.auth_client.authorize_url(provider, &redirect_url)?;
        info!(%provider, %redirect_url, "opening browser for OAuth sign in");

        match self.browser.open_auth_session(&auth_url, &redirect_url).await? {
            BrowserResult::Success { url } => Ok(self.exchange.exchange(&url).await?),
            BrowserResult::Cancel | BrowserResult::Dismiss => Err(AuthFailure::Cancelled),
        }
    }
}

#[async_trait::async_trait]
impl AuthService for OAuthAuthService {
    async fn sign_in(&self, provider: Provider) -> Result<Session, AuthFailure> {
        match self.run_flow(provider).await {
            Ok(session) => {
                cache_user(&self.cache, Some(&session.user));
                Ok(session)
            }
            Err(AuthFailure::Cancelled) => {
                info!(%provider, "OAuth flow was cancelled");
                Err(AuthFailure::Cancelled)
            }
            Err(e) => {
                error!(%provider, "OAuth sign in error: {}", e);
                Err(e)
            }
        }
    }

    async fn sign_out(&self) -> Result<(), AuthFailure> {
        if let Err(e) = self.auth_client.sign_out().await {
            error!("Sign out error: {}", e);
            return Err(e.into());
        }
        cache_user(&self.cache, None);
        self.cache.clear();
        self.exchange.forget().await;
        info!("signed out");
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<User>, BackendError> {
        let auth_client = &self.auth_client;
        let value = self
            .cache
            .fetch_query(&auth_keys::user(), move || async move {
                let user = auth_client.get_user().await?;
                serde_json::to_value(user)
                    .map_err(|e| BackendError::validation("unserializable user").with_cause(e))
            })
            .await?;
        serde_json::from_value(value)
            .map_err(|e| BackendError::validation("cached user has unexpected shape").with_cause(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::{BrowserScript, FakeAuthClient, ScriptedBrowser};
    use crate::query_cache::CacheOptions;
    use serde_json::json;

    struct Fixture {
        client: Arc<FakeAuthClient>,
        browser: Arc<ScriptedBrowser>,
        cache: Arc<QueryCache>,
        service: OAuthAuthService,
    }

    fn setup(script: BrowserScript) -> Fixture {
        let user = User {
            id: UserId(uuid::Uuid::new_v4()),
            email: Some("player@kalimba.app".to_string()),
            identities: vec![Identity {
                provider: "google".to_string(),
                identity_id: Some("g-1".to_string()),
            }],
        };
        let client = Arc::new(FakeAuthClient::new(user));
        let browser = Arc::new(ScriptedBrowser::new(script));
        let cache = Arc::new(QueryCache::new(CacheOptions::default()));
        let exchange = Arc::new(CallbackExchange::new(client.clone(), cache.clone()));
        let service =
            OAuthAuthService::new(client.clone(), browser.clone(), exchange, cache.clone());
        Fixture {
            client,
            browser,
            cache,
            service,
        }
    }

    #[tokio::test]
    async fn sign_in_caches_session_user() {
        let f = setup(BrowserScript::RedirectWith("access_token=tok".to_string()));
        let session = f.service.sign_in(Provider::Google).await.unwrap();

        assert_eq!(&session.user, f.client.user());
        assert_eq!(
            f.cache.get_as::<User>(&auth_keys::user()),
            Some(session.user.clone())
        );

        let opened = f.browser.opened();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].contains("provider=google"));
        assert!(opened[0].contains("auth%2Fcallback"));
    }

    #[tokio::test]
    async fn cancelled_browser_is_a_tagged_failure() {
        for script in [BrowserScript::Cancel, BrowserScript::Dismiss] {
            let f = setup(script);
            let err = f.service.sign_in(Provider::Apple).await.unwrap_err();
            assert!(err.is_cancelled());
            assert_eq!(err.message(), "OAuth flow was cancelled");
            assert!(f.cache.is_empty());
            assert_eq!(f.client.exchanges(), 0);
        }
    }

    #[tokio::test]
    async fn backend_errors_are_not_cancellations() {
        let f = setup(BrowserScript::RedirectWith(
            "error=access_denied&error_description=Denied".to_string(),
        ));
        let err = f.service.sign_in(Provider::Github).await.unwrap_err();
        assert!(matches!(
            err,
            AuthFailure::Backend(BackendError::AuthProvider { .. })
        ));
        assert!(f.cache.is_empty());

        let f = setup(BrowserScript::Fail("no browser".to_string()));
        let err = f.service.sign_in(Provider::Github).await.unwrap_err();
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn sign_out_clears_whole_cache() {
        let f = setup(BrowserScript::RedirectWith("access_token=tok".to_string()));
        f.service.sign_in(Provider::Google).await.unwrap();
        f.cache.set(&QueryKey::from(["songs"]), json!(["intro"]));

        f.service.sign_out().await.unwrap();

        assert_eq!(f.cache.peek(&auth_keys::user()), None);
        assert!(f.cache.is_empty());
        assert!(f.client.session().await.is_none());
    }

    #[tokio::test]
    async fn failed_sign_out_keeps_cache() {
        let f = setup(BrowserScript::RedirectWith("access_token=tok".to_string()));
        f.service.sign_in(Provider::Google).await.unwrap();
        f.client.set_fail_sign_out(true);

        let err = f.service.sign_out().await.unwrap_err();
        assert!(matches!(err, AuthFailure::Backend(BackendError::Network { .. })));
        assert!(f.cache.get(&auth_keys::user()).is_some());
    }

    #[tokio::test]
    async fn current_user_prefers_cache() {
        let f = setup(BrowserScript::RedirectWith("access_token=tok".to_string()));
        assert_eq!(f.service.current_user().await.unwrap(), None);
        assert_eq!(f.client.user_fetches(), 1);

        f.service.sign_in(Provider::Google).await.unwrap();
        let user = f.service.current_user().await.unwrap();
        assert_eq!(user.as_ref(), Some(f.client.user()));
        assert_eq!(f.client.user_fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn current_user_retries_reads() {
        let f = setup(BrowserScript::Cancel);
        f.client.fail_get_user(2);
        assert_eq!(f.service.current_user().await.unwrap(), None);
        assert_eq!(f.client.user_fetches(), 3);

        f.cache.clear();
        f.client.fail_get_user(3);
        assert!(f.service.current_user().await.is_err());
    }
}
