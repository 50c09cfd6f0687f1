use super::rest::{SupabaseConfig, send_json};
use crate::application_port::BackendError;
use crate::domain_model::*;
use crate::domain_port::*;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The `users` table through PostgREST.
pub struct SupabaseUserTable {
    http: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseUserTable {
    pub fn new(config: SupabaseConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(SupabaseUserTable { http, config })
    }

    fn request(&self, method: reqwest::Method) -> Result<reqwest::RequestBuilder, BackendError> {
        let url = self.config.endpoint("rest/v1/users")?;
        let key = self.config.table_key();
        Ok(self.config.authorize(self.http.request(method, url), key, key))
    }
}

#[async_trait::async_trait]
impl UserTable for SupabaseUserTable {
    async fn list_by_created_desc(&self) -> Result<Vec<UserRecord>, BackendError> {
        let request = self
            .request(reqwest::Method::GET)?
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        let users: Vec<UserRecord> = send_json(request).await?;
        debug!(count = users.len(), "listed users");
        Ok(users)
    }

    async fn insert(&self, user: &NewUser) -> Result<UserRecord, BackendError> {
        let request = self
            .request(reqwest::Method::POST)?
            .query(&[("select", "*")])
            .header("Prefer", "return=representation")
            // a single object instead of a one-element array
            .header("Accept", "application/vnd.pgrst.object+json")
            .json(&[user]);
        send_json(request).await
    }
}
