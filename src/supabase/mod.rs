//! Supabase-backed identity service and row store.

pub mod client;
mod endpoints;

pub use client::SupabaseClient;
