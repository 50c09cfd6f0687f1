mod client_app;

pub use client_app::*;
