//! # Barid
//!
//! Instagram DM automation backend: receives Instagram messaging webhooks,
//! answers them through an external AI agent, and keeps the connected
//! accounts' long-lived tokens fresh.

pub mod admin;
pub mod agent;
pub mod api_client;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod instagram;
pub mod models;
pub mod pipeline;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
