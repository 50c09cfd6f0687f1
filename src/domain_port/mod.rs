mod subscription;

pub use subscription::*;

// backend

mod auth_client;
mod user_table;

pub use auth_client::*;
pub use user_table::*;

// device

mod browser;
mod deep_link;
mod durable_storage;

pub use browser::*;
pub use deep_link::*;
pub use durable_storage::*;
