use crate::application_port::BackendError;
use crate::domain_model::*;

/// The backend `users` table. Uniqueness and defaults (`id`, `created_at`) are
/// enforced by the backend.
#[async_trait::async_trait]
pub trait UserTable: Send + Sync {
    async fn list_by_created_desc(&self) -> Result<Vec<UserRecord>, BackendError>;

    async fn insert(&self, user: &NewUser) -> Result<UserRecord, BackendError>;
}
