use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::infra_fs::FileStorage;
use crate::infra_memory::{FakeAuthClient, MemoryStorage};
use crate::infra_redis::RedisStorage;
use crate::infra_supabase::*;
use crate::logger::*;
use crate::query_cache::{CacheOptions, CachePersister, QueryCache};
use crate::settings::{self, Settings};
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const REDIS_PREFIX: &str = "kalimba";

/// Driven adapters the client runs on.
pub struct ClientParts {
    pub auth_client: Arc<dyn AuthClient>,
    pub browser: Arc<dyn Browser>,
    pub deep_links: Arc<dyn DeepLinkSource>,
    pub storage: Arc<dyn DurableStorage>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub cache: CacheOptions,
    pub persist_interval: Duration,
    pub gc_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            cache: CacheOptions::default(),
            persist_interval: Duration::from_secs(120),
            gc_interval: Duration::from_secs(60),
        }
    }
}

impl From<&settings::Cache> for ClientOptions {
    fn from(cache: &settings::Cache) -> Self {
        ClientOptions {
            cache: CacheOptions {
                stale_time: cache.stale_time(),
                gc_time: cache.gc_time(),
                retry: cache.retry,
            },
            persist_interval: Duration::from_secs(cache.persist_interval_secs),
            gc_interval: Duration::from_secs(cache.gc_interval_secs),
        }
    }
}

/// Application root on the client side. Owns the query cache, the auth
/// session bridge and the background tasks, and tears them down together.
pub struct ClientApp {
    pub cache: Arc<QueryCache>,
    pub auth: Arc<dyn AuthService>,
    bridge: Option<AuthSessionBridge>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ClientApp {
    pub async fn start(
        settings: &Settings,
        browser: Arc<dyn Browser>,
        deep_links: Arc<dyn DeepLinkSource>,
    ) -> anyhow::Result<Self> {
        settings.require_supabase()?;
        let storage = build_storage(&settings.cache).await?;
        let options = ClientOptions::from(&settings.cache);

        if settings.backend.kind == "memory" {
            let parts = ClientParts {
                auth_client: Arc::new(FakeAuthClient::new(memory_user())),
                browser,
                deep_links,
                storage,
            };
            return Ok(Self::assemble(parts, options).await);
        }

        let flow: AuthFlow = settings.auth.flow.parse()?;
        let config = SupabaseConfig::new(&settings.backend.url, settings.backend.anon_key.clone())?
            .with_flow(flow);
        let supabase = Arc::new(SupabaseAuthClient::new(config, storage.clone())?);
        let parts = ClientParts {
            auth_client: supabase.clone(),
            browser,
            deep_links,
            storage,
        };
        let mut app = Self::assemble(parts, options).await;

        // the bridge is listening by now and sees INITIAL_SESSION
        let margin = chrono::Duration::seconds(settings.auth.refresh_margin_secs);
        supabase.initialize(margin).await;
        if settings.auth.auto_refresh {
            let tick = Duration::from_secs(settings.auth.refresh_tick_secs);
            app.spawn(move |cancel| supabase.run_auto_refresh(tick, margin, cancel));
        }
        Ok(app)
    }

    /// Restores the persisted cache, then starts the bridge, the persister and
    /// the garbage collector.
    pub async fn assemble(parts: ClientParts, options: ClientOptions) -> Self {
        let cache = Arc::new(QueryCache::new(options.cache));
        let persister =
            CachePersister::new(cache.clone(), parts.storage, options.persist_interval);
        if let Err(e) = persister.restore().await {
            error!("Failed to restore query cache: {}", e);
        }

        let cancel = CancellationToken::new();
        let exchange = Arc::new(CallbackExchange::new(
            parts.auth_client.clone(),
            cache.clone(),
        ));
        let bridge = AuthSessionBridge::start(
            parts.auth_client.as_ref(),
            parts.deep_links,
            exchange.clone(),
            cache.clone(),
            cancel.child_token(),
        );
        let auth: Arc<dyn AuthService> = Arc::new(OAuthAuthService::new(
            parts.auth_client,
            parts.browser,
            exchange,
            cache.clone(),
        ));

        let tasks = vec![
            tokio::spawn(persister.run(cancel.child_token())),
            tokio::spawn(cache.clone().run_gc(options.gc_interval, cancel.child_token())),
        ];

        info!(entries = cache.len(), "client started");
        ClientApp {
            cache,
            auth,
            bridge: Some(bridge),
            tasks,
            cancel,
        }
    }

    /// Runs `task` until the app shuts down.
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task(self.cancel.child_token())));
    }

    /// Stops the listeners first, then the background tasks; the persister
    /// writes a last snapshot on the way out.
    pub async fn shutdown(mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.teardown().await;
        }
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("client task ended abnormally: {}", e);
            }
        }
        info!("client stopped");
    }
}

impl Drop for ClientApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn build_storage(cache: &settings::Cache) -> anyhow::Result<Arc<dyn DurableStorage>> {
    let storage: Arc<dyn DurableStorage> = match cache.storage.as_str() {
        "file" => Arc::new(FileStorage::new(&cache.storage_dir)),
        "redis" => {
            let url = cache
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("redis storage needs cache.redis_url"))?;
            Arc::new(RedisStorage::connect(url, REDIS_PREFIX).await?)
        }
        "memory" => Arc::new(MemoryStorage::new()),
        other => return Err(anyhow::anyhow!("Unknown cache storage: {}", other)),
    };
    Ok(storage)
}

/// Fixed identity signed in by the in-memory backend.
fn memory_user() -> User {
    User {
        id: UserId(uuid::Uuid::new_v5(
            &uuid::Uuid::NAMESPACE_URL,
            b"kalimba://memory-user",
        )),
        email: Some("player@kalimba.local".to_string()),
        identities: vec![Identity {
            provider: "memory".to_string(),
            identity_id: None,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::{BrowserScript, DeepLinkChannel, ScriptedBrowser};
    use crate::query_cache::CACHE_STORAGE_KEY;

    fn parts(
        client: Arc<FakeAuthClient>,
        storage: Arc<MemoryStorage>,
        initial_link: Option<&str>,
    ) -> ClientParts {
        ClientParts {
            auth_client: client,
            browser: Arc::new(ScriptedBrowser::new(BrowserScript::RedirectWith(
                "access_token=tok".to_string(),
            ))),
            deep_links: Arc::new(DeepLinkChannel::new(initial_link.map(str::to_owned))),
            storage,
        }
    }

    #[tokio::test]
    async fn signed_in_user_survives_restart() {
        let storage = Arc::new(MemoryStorage::new());
        let client = Arc::new(FakeAuthClient::new(memory_user()));

        let app = ClientApp::assemble(
            parts(client.clone(), storage.clone(), None),
            ClientOptions::default(),
        )
        .await;
        app.auth.sign_in(Provider::Google).await.unwrap();
        app.shutdown().await;
        assert!(storage.get_item(CACHE_STORAGE_KEY).await.unwrap().is_some());

        let fresh_client = Arc::new(FakeAuthClient::new(memory_user()));
        let app = ClientApp::assemble(
            parts(fresh_client.clone(), storage, None),
            ClientOptions::default(),
        )
        .await;
        let user = app.auth.current_user().await.unwrap();
        assert_eq!(user, Some(memory_user()));
        assert_eq!(fresh_client.user_fetches(), 0);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn sign_out_is_persisted_on_shutdown() {
        let storage = Arc::new(MemoryStorage::new());
        let client = Arc::new(FakeAuthClient::new(memory_user()));
        let app = ClientApp::assemble(
            parts(client.clone(), storage.clone(), None),
            ClientOptions::default(),
        )
        .await;
        app.auth.sign_in(Provider::Github).await.unwrap();
        app.auth.sign_out().await.unwrap();
        app.shutdown().await;

        let app = ClientApp::assemble(
            parts(client, storage, None),
            ClientOptions::default(),
        )
        .await;
        assert_eq!(app.auth.current_user().await.unwrap(), None);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_sign_out_never_restores_user() {
        let storage = Arc::new(MemoryStorage::new());
        for _ in 0..25 {
            let client = Arc::new(FakeAuthClient::new(memory_user()));
            let app = ClientApp::assemble(
                parts(client.clone(), storage.clone(), None),
                ClientOptions::default(),
            )
            .await;
            app.auth.sign_in(Provider::Github).await.unwrap();
            app.auth.sign_out().await.unwrap();
            app.shutdown().await;

            let app = ClientApp::assemble(
                parts(client.clone(), storage.clone(), None),
                ClientOptions::default(),
            )
            .await;
            assert_eq!(app.auth.current_user().await.unwrap(), None);
            assert_eq!(client.user_fetches(), 0);
            app.shutdown().await;
        }
    }

    #[tokio::test]
    async fn launch_link_signs_in() {
        let storage = Arc::new(MemoryStorage::new());
        let client = Arc::new(FakeAuthClient::new(memory_user()));
        let app = ClientApp::assemble(
            parts(
                client.clone(),
                storage,
                Some("kalimba://auth/callback#access_token=launch"),
            ),
            ClientOptions::default(),
        )
        .await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while app.cache.get_as::<User>(&auth_keys::user()).is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("launch link was not exchanged");
        assert_eq!(client.exchanges(), 1);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn background_tasks_stop_with_the_app() {
        let storage = Arc::new(MemoryStorage::new());
        let client = Arc::new(FakeAuthClient::new(memory_user()));
        let mut app = ClientApp::assemble(
            parts(client, storage, None),
            ClientOptions::default(),
        )
        .await;
        let (tx, rx) = tokio::sync::oneshot::channel();
        app.spawn(|cancel| async move {
            cancel.cancelled().await;
            let _ = tx.send(());
        });
        app.shutdown().await;
        assert!(rx.await.is_ok());
    }
}
