//! Adapters for a Supabase project: GoTrue for auth, PostgREST for tables.

mod auth_client_supabase;
mod rest;
mod user_table_supabase;

pub use auth_client_supabase::*;
pub use rest::{AuthFlow, SupabaseConfig};
pub use user_table_supabase::*;
