use crate::application_port::BackendError;
use crate::domain_model::*;
use crate::domain_port::AuthClient;
use crate::query_cache::QueryCache;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Writes the signed-in user (or null) under the user key.
pub(crate) fn cache_user(cache: &QueryCache, user: Option<&User>) {
    let key = auth_keys::user();
    match user {
        Some(user) => {
            if let Err(e) = cache.set_as(&key, user) {
                error!("caching user {}: {}", user.id, e);
            }
        }
        None => cache.set(&key, Value::Null),
    }
}

/// Sole owner of the "callback URL → session" step.
///
/// The OAuth flow and the deep-link listener can both see the same callback
/// URL. Exchanges run one at a time, and a URL that was already exchanged is
/// answered from the remembered session instead of hitting the backend again.
pub struct CallbackExchange {
    auth_client: Arc<dyn AuthClient>,
    cache: Arc<QueryCache>,
    last: Mutex<Option<(String, Session)>>,
}

impl CallbackExchange {
    pub fn new(auth_client: Arc<dyn AuthClient>, cache: Arc<QueryCache>) -> Self {
        CallbackExchange {
            auth_client,
            cache,
            last: Mutex::new(None),
        }
    }

    pub async fn exchange(&self, callback_url: &str) -> Result<Session, BackendError> {
        let mut last = self.last.lock().await;
        if let Some((url, session)) = last.as_ref() {
            if url == callback_url {
                debug!("callback already exchanged");
                return Ok(session.clone());
            }
        }

        match self.auth_client.exchange_callback(callback_url).await {
            Ok(session) => {
                info!(user = %session.user.id, email = ?session.user.email, "auth session restored");
                cache_user(&self.cache, Some(&session.user));
                *last = Some((callback_url.to_owned(), session.clone()));
                Ok(session)
            }
            Err(e) => {
                error!("Auth callback error: {}", e);
                Err(e)
            }
        }
    }

    /// Drops the remembered exchange, e.g. after sign-out.
    pub async fn forget(&self) {
        self.last.lock().await.take();
    }
}
