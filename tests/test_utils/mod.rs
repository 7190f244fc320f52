//! Shared fixtures for integration tests: an in-memory SQLite database with
//! migrations applied, app state wiring and fakes for the two outbound seams.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use barid::agent::{AgentAudio, AgentGateway, AgentReply, AgentRequest, GatewayError};
use barid::config::AppConfig;
use barid::crypto::CryptoKey;
use barid::instagram::{ConnectedAccount, InstagramApi, LongLivedToken, PlatformError, SentMessage};
use barid::models::message;
use barid::repositories::{AutomationRepository, IntegrationRepository, MessageRepository, NewIntegration};
use barid::server::AppState;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection, EntityTrait, PaginatorTrait};
use uuid::Uuid;

pub const OPERATOR_TOKEN: &str = "test-operator-token";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("valid test key")
}

pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        crypto_key: Some(vec![7u8; 32]),
        ..Default::default()
    }
}

pub fn integration_repo(db: &DatabaseConnection) -> IntegrationRepository {
    IntegrationRepository::new(Arc::new(db.clone()), test_crypto_key())
}

pub fn automation_repo(db: &DatabaseConnection) -> AutomationRepository {
    AutomationRepository::new(Arc::new(db.clone()))
}

pub fn message_repo(db: &DatabaseConnection) -> MessageRepository {
    MessageRepository::new(Arc::new(db.clone()))
}

pub fn app_state(
    config: AppConfig,
    db: &DatabaseConnection,
    agent: Arc<dyn AgentGateway>,
    instagram: Arc<dyn InstagramApi>,
) -> AppState {
    AppState::new(Arc::new(config), db.clone(), test_crypto_key(), instagram, agent)
}

/// Inserts an Instagram integration for `owner` with the given token.
pub async fn insert_integration(
    db: &DatabaseConnection,
    owner: Uuid,
    external_account_id: &str,
    token: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<barid::models::integration::Model> {
    integration_repo(db)
        .create(NewIntegration {
            owner_user_id: owner,
            external_account_id: external_account_id.to_string(),
            page_id: None,
            page_name: Some("Test Page".to_string()),
            access_token: token.to_string(),
            expires_at,
        })
        .await
}

pub async fn count_messages(db: &DatabaseConnection) -> u64 {
    message::Entity::find()
        .count(db)
        .await
        .expect("count messages")
}

#[derive(Debug, Clone)]
pub enum AgentBehavior {
    Text(String),
    TextAndAudio(String, String),
    Empty,
    Fail,
}

/// Agent gateway that records every request and the number of stored
/// messages at the moment it was called.
pub struct FakeAgent {
    behavior: AgentBehavior,
    db: Option<DatabaseConnection>,
    pub requests: Mutex<Vec<AgentRequest>>,
    pub messages_at_call: Mutex<Vec<u64>>,
}

impl FakeAgent {
    pub fn new(behavior: AgentBehavior) -> Self {
        Self {
            behavior,
            db: None,
            requests: Mutex::new(Vec::new()),
            messages_at_call: Mutex::new(Vec::new()),
        }
    }

    pub fn observing(behavior: AgentBehavior, db: &DatabaseConnection) -> Self {
        Self {
            db: Some(db.clone()),
            ..Self::new(behavior)
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentGateway for FakeAgent {
    async fn generate_reply(&self, request: &AgentRequest) -> Result<AgentReply, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(db) = &self.db {
            let count = count_messages(db).await;
            self.messages_at_call.lock().unwrap().push(count);
        }

        match &self.behavior {
            AgentBehavior::Text(text) => Ok(AgentReply {
                message: text.clone(),
                audio: None,
            }),
            AgentBehavior::TextAndAudio(text, url) => Ok(AgentReply {
                message: text.clone(),
                audio: Some(AgentAudio { url: url.clone() }),
            }),
            AgentBehavior::Empty => Ok(AgentReply {
                message: String::new(),
                audio: None,
            }),
            AgentBehavior::Fail => Err(GatewayError::Status {
                status: 500,
                body: "agent exploded".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentKind {
    Text(String),
    Audio(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub access_token: String,
    pub recipient_id: String,
    pub kind: SentKind,
}

/// Instagram fake: records sends, refreshes tokens by appending `-refreshed`
/// and fails for tokens listed in `failing_tokens`.
#[derive(Default)]
pub struct FakeInstagram {
    pub fail_sends: bool,
    pub fail_audio: bool,
    pub failing_tokens: HashSet<String>,
    pub exchange_account: Option<ConnectedAccount>,
    pub sent: Mutex<Vec<SentRecord>>,
    pub refreshed: Mutex<Vec<String>>,
}

impl FakeInstagram {
    pub fn failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Default::default()
        }
    }

    pub fn failing_audio() -> Self {
        Self {
            fail_audio: true,
            ..Default::default()
        }
    }

    pub fn with_failing_tokens<I: IntoIterator<Item = &'static str>>(tokens: I) -> Self {
        Self {
            failing_tokens: tokens.into_iter().map(str::to_string).collect(),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap().clone()
    }

    fn record_send(
        &self,
        access_token: &str,
        recipient_id: &str,
        kind: SentKind,
    ) -> Result<SentMessage, PlatformError> {
        if self.fail_sends || (self.fail_audio && matches!(kind, SentKind::Audio(_))) {
            return Err(PlatformError::Http {
                status: 400,
                body: "{\"error\":{\"message\":\"Invalid OAuth access token\"}}".to_string(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentRecord {
            access_token: access_token.to_string(),
            recipient_id: recipient_id.to_string(),
            kind,
        });
        Ok(SentMessage {
            recipient_id: recipient_id.to_string(),
            message_id: format!("m_out_{}", sent.len()),
        })
    }
}

#[async_trait]
impl InstagramApi for FakeInstagram {
    async fn send_text(
        &self,
        access_token: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        self.record_send(access_token, recipient_id, SentKind::Text(text.to_string()))
    }

    async fn send_audio(
        &self,
        access_token: &str,
        recipient_id: &str,
        audio_url: &str,
    ) -> Result<SentMessage, PlatformError> {
        self.record_send(access_token, recipient_id, SentKind::Audio(audio_url.to_string()))
    }

    async fn refresh_access_token(&self, access_token: &str) -> Result<LongLivedToken, PlatformError> {
        self.refreshed.lock().unwrap().push(access_token.to_string());
        if self.failing_tokens.contains(access_token) {
            return Err(PlatformError::Http {
                status: 400,
                body: "{\"error\":{\"message\":\"Session has expired\"}}".to_string(),
            });
        }
        Ok(LongLivedToken {
            access_token: format!("  {}-refreshed\n", access_token),
            token_type: Some("bearer".to_string()),
            expires_in: 5_184_000,
        })
    }

    async fn exchange_code(&self, _code: &str) -> Result<ConnectedAccount, PlatformError> {
        self.exchange_account
            .clone()
            .ok_or(PlatformError::NotConfigured("client_id"))
    }
}
