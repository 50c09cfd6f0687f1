use crate::application_port::BackendError;
use crate::domain_model::UserRecord;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Name and email are required")]
    MissingFields,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Default)]
pub struct CreateUserInput {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[async_trait::async_trait]
pub trait UserService: Send + Sync {
    /// All users, newest first.
    async fn list_users(&self) -> Result<Vec<UserRecord>, UserServiceError>;
    async fn create_user(&self, input: CreateUserInput) -> Result<UserRecord, UserServiceError>;
}
