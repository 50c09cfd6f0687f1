pub mod api;
pub mod app;
pub mod logger;
pub mod settings;

pub mod server;

pub mod application_port;
pub mod application_impl;
pub mod domain_model;
pub mod domain_port;
pub mod query_cache;

pub mod infra_fs;
pub mod infra_loopback;
pub mod infra_memory;
pub mod infra_postgres;
pub mod infra_redis;
pub mod infra_supabase;
