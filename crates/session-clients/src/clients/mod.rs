//! HTTP bindings for the bridge's two collaborators:
//! - Clerk: mints tokens from a named JWT template ([`TokenSource`](session_bridge::TokenSource))
//! - Supabase: accepts and stores the database session ([`SessionBackend`](session_bridge::SessionBackend))
//!
//! Both clients share [`ServiceConfig`] for URLs, keys and timeouts.

pub mod clerk;
pub mod config;
pub mod supabase;

pub use clerk::{ClerkClient, ClerkError};
pub use config::{ConfigError, ServiceConfig, ServiceEndpoint};
pub use supabase::{SupabaseAuthClient, SupabaseError, UserRow};
