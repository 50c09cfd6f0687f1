use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::UserTable;
use std::sync::Arc;
use tracing::debug;

/// Checks that `name` and `email` are present and hands everything else to
/// the backend table.
pub struct RealUserService {
    user_table: Arc<dyn UserTable>,
}

impl RealUserService {
    pub fn new(user_table: Arc<dyn UserTable>) -> RealUserService {
        RealUserService { user_table }
    }
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.is_empty())
}

#[async_trait::async_trait]
impl UserService for RealUserService {
    async fn list_users(&self) -> Result<Vec<UserRecord>, UserServiceError> {
        Ok(self.user_table.list_by_created_desc().await?)
    }

    async fn create_user(&self, input: CreateUserInput) -> Result<UserRecord, UserServiceError> {
        let (Some(name), Some(email)) = (required(input.name), required(input.email)) else {
            debug!("rejecting user without name or email");
            return Err(UserServiceError::MissingFields);
        };
        let record = self.user_table.insert(&NewUser { name, email }).await?;
        Ok(record)
    }
}
