use super::callback_exchange::{CallbackExchange, cache_user};
use crate::domain_model::*;
use crate::domain_port::*;
use crate::query_cache::QueryCache;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Keeps the cached user in line with the auth backend.
///
/// Listens to auth-state notifications and to deep links; both listeners are
/// registered in [`AuthSessionBridge::start`] and released by
/// [`AuthSessionBridge::teardown`].
pub struct AuthSessionBridge {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AuthSessionBridge {
    pub fn start(
        auth_client: &dyn AuthClient,
        deep_links: Arc<dyn DeepLinkSource>,
        exchange: Arc<CallbackExchange>,
        cache: Arc<QueryCache>,
        cancel: CancellationToken,
    ) -> Self {
        let auth_events = auth_client.on_auth_state_change();
        let links = deep_links.subscribe();

        let auth_task = tokio::spawn(listen_auth_state(
            auth_events,
            cache,
            exchange.clone(),
            cancel.clone(),
        ));
        let link_task = tokio::spawn(listen_deep_links(
            deep_links,
            links,
            exchange,
            cancel.clone(),
        ));

        debug!("auth session bridge started");
        AuthSessionBridge {
            cancel,
            tasks: vec![auth_task, link_task],
        }
    }

    /// Unsubscribes both listeners and waits for them to stop.
    pub async fn teardown(mut self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("auth bridge listener ended abnormally: {}", e);
            }
        }
        debug!("auth session bridge stopped");
    }
}

impl Drop for AuthSessionBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen_auth_state(
    mut events: Subscription<AuthStateChange>,
    cache: Arc<QueryCache>,
    exchange: Arc<CallbackExchange>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            change = events.recv() => match change {
                Some(change) => apply_auth_change(&cache, &exchange, change).await,
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
    // changes emitted before teardown still land, so a queued SIGNED_OUT
    // always wins over the SIGNED_IN ahead of it
    while let Some(change) = events.try_recv() {
        apply_auth_change(&cache, &exchange, change).await;
    }
    events.unsubscribe();
}

async fn apply_auth_change(cache: &QueryCache, exchange: &CallbackExchange, change: AuthStateChange) {
    let email = change
        .session
        .as_ref()
        .and_then(|s| s.user.email.as_deref());
    info!(event = ?change.event, ?email, "Auth state changed");

    match change.event {
        AuthChangeEvent::SignedIn | AuthChangeEvent::TokenRefreshed => {
            cache_user(cache, change.session.as_ref().map(|s| &s.user));
        }
        AuthChangeEvent::SignedOut => {
            cache_user(cache, None);
            exchange.forget().await;
        }
        _ => {}
    }
}

async fn listen_deep_links(
    source: Arc<dyn DeepLinkSource>,
    mut links: Subscription<String>,
    exchange: Arc<CallbackExchange>,
    cancel: CancellationToken,
) {
    if let Some(url) = source.initial_url().await {
        handle_deep_link(&exchange, &url).await;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            url = links.recv() => match url {
                Some(url) => handle_deep_link(&exchange, &url).await,
                None => break,
            },
        }
    }
    links.unsubscribe();
}

async fn handle_deep_link(exchange: &CallbackExchange, url: &str) {
    if !is_auth_callback(url) {
        trace!("ignoring deep link without auth callback");
        return;
    }
    // the exchange writes the user on success; nothing to undo on failure
    if let Err(e) = exchange.exchange(url).await {
        warn!("Deep link auth error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::{DeepLinkChannel, FakeAuthClient};
    use crate::query_cache::{CacheObserver, CacheOptions};
    use serde_json::{Value, json};
    use std::time::Duration;

    struct Fixture {
        client: Arc<FakeAuthClient>,
        links: Arc<DeepLinkChannel>,
        cache: Arc<QueryCache>,
        bridge: AuthSessionBridge,
    }

    fn user() -> User {
        User {
            id: UserId(uuid::Uuid::new_v4()),
            email: Some("player@kalimba.app".to_string()),
            identities: vec![],
        }
    }

    fn start(initial: Option<&str>) -> Fixture {
        let client = Arc::new(FakeAuthClient::new(user()));
        let links = Arc::new(DeepLinkChannel::new(initial.map(str::to_owned)));
        let cache = Arc::new(QueryCache::new(CacheOptions::default()));
        let exchange = Arc::new(CallbackExchange::new(client.clone(), cache.clone()));
        let bridge = AuthSessionBridge::start(
            client.as_ref(),
            links.clone(),
            exchange,
            cache.clone(),
            CancellationToken::new(),
        );
        Fixture {
            client,
            links,
            cache,
            bridge,
        }
    }

    async fn next_value(observer: &mut CacheObserver) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(5), observer.changed())
            .await
            .expect("cache was not updated")
            .expect("entry was removed")
    }

    #[tokio::test]
    async fn signed_in_and_refreshed_write_user() {
        let f = start(None);
        let mut observer = f.cache.subscribe(&auth_keys::user());
        let session = Session::new("a", "r", 3600, f.client.user().clone());

        f.client.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        let expected = serde_json::to_value(f.client.user()).unwrap();
        assert_eq!(next_value(&mut observer).await, Some(expected.clone()));

        f.client.emit(AuthChangeEvent::TokenRefreshed, Some(session));
        assert_eq!(next_value(&mut observer).await, Some(expected));
        f.bridge.teardown().await;
    }

    #[tokio::test]
    async fn signed_out_writes_null() {
        let f = start(None);
        f.cache.set_as(&auth_keys::user(), f.client.user()).unwrap();
        let mut observer = f.cache.subscribe(&auth_keys::user());

        f.client.emit(AuthChangeEvent::SignedOut, None);
        assert_eq!(next_value(&mut observer).await, Some(Value::Null));
        f.bridge.teardown().await;
    }

    #[tokio::test]
    async fn callback_deep_link_signs_in() {
        let f = start(None);
        let mut observer = f.cache.subscribe(&auth_keys::user());

        f.links.push("https://kalimba.app/songs/42");
        f.links.push("kalimba://auth/callback#access_token=t1");

        let expected = serde_json::to_value(f.client.user()).unwrap();
        // SIGNED_IN from the backend and the exchange both write the same user
        assert_eq!(next_value(&mut observer).await, Some(expected));
        assert_eq!(f.client.exchanges(), 1);
        f.bridge.teardown().await;
    }

    #[tokio::test]
    async fn initial_url_is_handled() {
        let f = start(Some("kalimba://auth/callback#access_token=boot"));
        let mut observer = f.cache.subscribe(&auth_keys::user());
        let expected = serde_json::to_value(f.client.user()).unwrap();
        if observer.current() != Some(expected.clone()) {
            assert_eq!(next_value(&mut observer).await, Some(expected));
        }
        f.bridge.teardown().await;
    }

    #[tokio::test]
    async fn failed_callback_leaves_cache_untouched() {
        let f = start(None);
        f.cache.set(&QueryKey::from(["songs"]), json!([1]));
        f.links.push("kalimba://auth/callback#error=server_error");
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.client.exchanges() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("callback was not exchanged");
        f.bridge.teardown().await;

        assert_eq!(f.cache.peek(&auth_keys::user()), None);
        assert_eq!(f.cache.len(), 1);
    }

    #[tokio::test]
    async fn teardown_applies_queued_changes_in_order() {
        for _ in 0..50 {
            let f = start(None);
            let session = Session::new("a", "r", 3600, f.client.user().clone());
            f.client.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
            f.client.emit(AuthChangeEvent::TokenRefreshed, Some(session));
            f.client.emit(AuthChangeEvent::SignedOut, None);
            f.bridge.teardown().await;

            assert_eq!(f.cache.peek(&auth_keys::user()), Some(Value::Null));
        }
    }

    #[tokio::test]
    async fn teardown_unsubscribes_listeners() {
        let f = start(None);
        f.bridge.teardown().await;

        assert_eq!(f.links.push("kalimba://auth/callback#access_token=late"), 0);
        f.client.emit(
            AuthChangeEvent::SignedIn,
            Some(Session::new("a", "r", 3600, f.client.user().clone())),
        );
        tokio::task::yield_now().await;
        assert!(f.cache.is_empty());
        assert_eq!(f.client.exchanges(), 0);
    }
}
