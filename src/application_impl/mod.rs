mod auth_bridge;
mod auth_service_impl;
mod callback_exchange;
mod user_service_impl;

pub use auth_bridge::*;
pub use auth_service_impl::*;
pub use callback_exchange::CallbackExchange;
pub use user_service_impl::*;
