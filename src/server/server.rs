use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::MemoryUserTable;
use crate::infra_postgres::{self, PostgresUserTable};
use crate::infra_supabase::*;
use crate::logger::*;
use crate::settings::Settings;
use nanoid::nanoid;
use sqlx::PgPool;
use std::sync::Arc;

/// Services behind the HTTP API.
pub struct Server {
    pub user_service: Arc<dyn UserService>,
    database: &'static str,
    run_id: String,
    pool: Option<PgPool>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let alphabet: [char; 16] = [
            '1', '2', '3', '4', '5', '6', '7', '8', '9', '0', 'a', 'b', 'c', 'd', 'e', 'f',
        ];
        let run_id = nanoid!(10, &alphabet);
        let backend = &settings.backend;

        let mut pool = None;
        let (user_table, database): (Arc<dyn UserTable>, &'static str) =
            match backend.kind.as_str() {
                "supabase" => {
                    let config = SupabaseConfig::new(&backend.url, backend.anon_key.clone())?
                        .with_service_role_key(backend.service_role_key.clone());
                    (Arc::new(SupabaseUserTable::new(config)?), "Supabase")
                }
                "postgres" => {
                    let url = backend
                        .database_url
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("postgres backend needs database_url"))?;
                    let pg = infra_postgres::connect(url, backend.max_connections).await?;
                    infra_postgres::ensure_schema(&pg).await?;
                    pool = Some(pg.clone());
                    (Arc::new(PostgresUserTable::new(pg)), "Postgres")
                }
                "memory" => (Arc::new(MemoryUserTable::new()), "Memory"),
                other => return Err(anyhow::anyhow!("Unknown backend: {}", other)),
            };

        let user_service: Arc<dyn UserService> = Arc::new(RealUserService::new(user_table));

        info!(%run_id, database, "server started");
        Ok(Self {
            user_service,
            database,
            run_id,
            pool,
        })
    }

    /// Server over an already built user service.
    pub fn with_user_service(user_service: Arc<dyn UserService>, database: &'static str) -> Self {
        Self {
            user_service,
            database,
            run_id: nanoid!(10),
            pool: None,
        }
    }

    /// Name reported by the health endpoint.
    pub fn database_label(&self) -> &'static str {
        self.database
    }

    pub async fn shutdown(&self) {
        info!(run_id = %self.run_id, "server shutting down...");
        if let Some(pool) = &self.pool {
            pool.close().await;
            info!("database pool closed");
        }
    }
}
