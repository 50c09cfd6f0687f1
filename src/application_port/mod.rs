mod auth_service;
mod backend_error;
mod user_service;

pub use auth_service::*;
pub use backend_error::*;
pub use user_service::*;
