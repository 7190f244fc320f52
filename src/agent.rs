//! # AI agent gateway
//!
//! Forwards an inbound DM to the external AI agent and returns its reply. The
//! agent is an opaque HTTP endpoint; a single attempt is made per DM.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::truncate_snippet;

/// What the agent is asked to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub sender_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_voice: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AgentAudio>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAudio {
    pub url: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("agent endpoint is not configured")]
    NotConfigured,
    #[error("agent request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("agent returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("agent returned a malformed reply: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn generate_reply(&self, request: &AgentRequest) -> Result<AgentReply, GatewayError>;
}

/// Envelope the agent endpoint expects: `{ "body": { "createdDm": { .. } } }`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    body: EnvelopeBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeBody<'a> {
    created_dm: &'a AgentRequest,
}

#[derive(Debug, Clone)]
pub struct HttpAgentGateway {
    http: Client,
    endpoint: Option<String>,
    token: Option<String>,
}

impl HttpAgentGateway {
    pub fn new(endpoint: Option<String>, token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            token,
        }
    }
}

#[async_trait]
impl AgentGateway for HttpAgentGateway {
    async fn generate_reply(&self, request: &AgentRequest) -> Result<AgentReply, GatewayError> {
        let endpoint = self.endpoint.as_deref().ok_or(GatewayError::NotConfigured)?;

        let mut builder = self.http.post(endpoint).json(&Envelope {
            body: EnvelopeBody {
                created_dm: request,
            },
        });
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: truncate_snippet(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}
