//! In-process adapters for every driven port. Used by the `memory` backend and
//! by tests.

mod auth_client_fake;
mod browser_scripted;
mod deep_link_channel;
mod storage_memory;
mod user_table_memory;

pub use auth_client_fake::*;
pub use browser_scripted::*;
pub use deep_link_channel::*;
pub use storage_memory::*;
pub use user_table_memory::*;
