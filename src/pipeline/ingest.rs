//! Ingestion stages: classify, lookup, resolve, persist and ask the agent.

use tracing::debug;

use super::StageError;
use crate::agent::{AgentGateway, AgentReply, AgentRequest, GatewayError};
use crate::instagram::webhook::MessagingEvent;
use crate::models::message::MessageDirection;
use crate::models::{automation, integration, message};
use crate::repositories::{AutomationRepository, IntegrationRepository, MessageRepository, NewMessage};

/// A DM worth answering, extracted from a messaging event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDm {
    /// `entry.id` of the delivery, used as a fallback recipient
    pub entry_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
    pub mid: Option<String>,
    pub voice_url: Option<String>,
}

impl InboundDm {
    pub fn is_voice(&self) -> bool {
        self.voice_url.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Delivery/read receipts and other non-message events
    NoMessage,
    /// Copies of messages the account sent itself
    Echo,
    /// Neither text nor an audio attachment
    Unsupported,
}

/// Decides whether an event is a DM to answer.
pub fn classify(entry_id: &str, event: &MessagingEvent) -> Result<InboundDm, SkipReason> {
    let message = event.message.as_ref().ok_or(SkipReason::NoMessage)?;
    if message.is_echo {
        return Err(SkipReason::Echo);
    }

    let text = message
        .text
        .as_deref()
        .filter(|t| !t.trim().is_empty());
    let voice_url = message.audio_url();

    if text.is_none() && voice_url.is_none() {
        return Err(SkipReason::Unsupported);
    }

    Ok(InboundDm {
        entry_id: entry_id.to_string(),
        sender_id: event.sender.id.clone(),
        recipient_id: event.recipient.id.clone(),
        text: text.unwrap_or_default().to_string(),
        mid: message.mid.clone(),
        voice_url: voice_url.map(str::to_string),
    })
}

/// Finds the integration addressed by the DM, trying the entry id second.
pub async fn lookup_integration(
    integrations: &IntegrationRepository,
    dm: &InboundDm,
) -> Result<integration::Model, StageError> {
    if let Some(found) = integrations.find_by_recipient(&dm.recipient_id).await? {
        return Ok(found);
    }

    if dm.entry_id != dm.recipient_id
        && let Some(found) = integrations.find_by_recipient(&dm.entry_id).await?
    {
        debug!(entry_id = %dm.entry_id, "Integration matched by entry id");
        return Ok(found);
    }

    Err(StageError::IntegrationNotFound {
        recipient_id: dm.recipient_id.clone(),
    })
}

/// The owner's oldest active automation.
pub async fn resolve_automation(
    automations: &AutomationRepository,
    integration: &integration::Model,
) -> Result<automation::Model, StageError> {
    automations
        .first_active_for_owner(&integration.owner_user_id)
        .await?
        .ok_or(StageError::NoActiveAutomation {
            owner_user_id: integration.owner_user_id,
        })
}

/// Stores the inbound DM. Runs before the agent is called.
pub async fn persist_inbound(
    messages: &MessageRepository,
    automation: &automation::Model,
    dm: &InboundDm,
) -> Result<message::Model, StageError> {
    let text = match (&dm.voice_url, dm.text.is_empty()) {
        (Some(url), true) => url.clone(),
        _ => dm.text.clone(),
    };

    Ok(messages
        .record(NewMessage {
            automation_id: automation.id,
            sender_id: dm.sender_id.clone(),
            receiver_id: dm.recipient_id.clone(),
            text,
            direction: MessageDirection::Inbound,
            platform_message_id: dm.mid.clone(),
        })
        .await?)
}

/// Asks the agent for a reply. A reply with neither text nor audio is malformed.
pub async fn request_reply(
    agent: &dyn AgentGateway,
    dm: &InboundDm,
) -> Result<AgentReply, StageError> {
    let request = AgentRequest {
        sender_id: dm.sender_id.clone(),
        message: dm.text.clone(),
        is_voice: dm.is_voice().then_some(true),
        voice_url: dm.voice_url.clone(),
    };

    let reply = agent.generate_reply(&request).await?;
    if reply.message.trim().is_empty() && reply.audio.is_none() {
        return Err(GatewayError::Malformed("reply has neither text nor audio".to_string()).into());
    }
    Ok(reply)
}
