//! # Instagram platform integration
//!
//! The messaging/token API surface the service depends on, expressed as the
//! [`InstagramApi`] trait so the webhook pipeline and the refresh job can be
//! exercised against fakes. [`client::InstagramClient`] is the HTTP
//! implementation and [`webhook`] holds the inbound payload types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;
pub mod webhook;

pub use client::InstagramClient;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Instagram API returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error talking to Instagram: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected Instagram response: {0}")]
    Malformed(String),

    #[error("Instagram client not configured: {0}")]
    NotConfigured(&'static str),
}

impl PlatformError {
    /// Upstream HTTP status, when the platform answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            PlatformError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub recipient_id: String,
    pub message_id: String,
}

/// A long-lived token as returned by refresh and exchange endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongLivedToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds from now
    pub expires_in: i64,
}

/// Account connected through the OAuth code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedAccount {
    /// Instagram-scoped account id
    pub account_id: String,
    /// Professional account id used as webhook recipient, when reported
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub token: LongLivedToken,
}

#[async_trait]
pub trait InstagramApi: Send + Sync {
    /// Sends a text DM from the token's account to `recipient_id`.
    async fn send_text(
        &self,
        access_token: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<SentMessage, PlatformError>;

    /// Sends an audio attachment hosted at `audio_url`.
    async fn send_audio(
        &self,
        access_token: &str,
        recipient_id: &str,
        audio_url: &str,
    ) -> Result<SentMessage, PlatformError>;

    /// Exchanges a still-valid long-lived token for a fresh one.
    async fn refresh_access_token(&self, access_token: &str) -> Result<LongLivedToken, PlatformError>;

    /// Completes the OAuth flow for an authorization code.
    async fn exchange_code(&self, code: &str) -> Result<ConnectedAccount, PlatformError>;
}
