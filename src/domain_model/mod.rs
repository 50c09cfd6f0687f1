mod callback;
mod provider;
mod query_key;
mod session;
mod user;
mod user_record;

pub use callback::*;
pub use provider::*;
pub use query_key::*;
pub use session::*;
pub use user::*;
pub use user_record::*;
