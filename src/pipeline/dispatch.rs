//! Reply dispatch: send the agent's reply and record it once delivered.

use tracing::{info, warn};

use super::StageError;
use crate::agent::AgentReply;
use crate::instagram::InstagramApi;
use crate::models::message::MessageDirection;
use crate::models::{automation, integration, message};
use crate::repositories::{IntegrationRepository, MessageRepository, NewMessage};

/// Sends the reply text (when non-empty) and then the audio (when present).
///
/// Nothing is stored when the first send fails. When the text went out but
/// the audio did not, the delivered text is still recorded with its mid and
/// the audio failure is returned.
pub async fn dispatch_reply(
    integrations: &IntegrationRepository,
    instagram: &dyn InstagramApi,
    messages: &MessageRepository,
    integration: &integration::Model,
    automation: &automation::Model,
    recipient_id: &str,
    reply: &AgentReply,
) -> Result<message::Model, StageError> {
    let token = integrations.decrypt_token(integration)?;
    let mut last_mid = None;

    if !reply.message.trim().is_empty() {
        let sent = instagram
            .send_text(&token, recipient_id, &reply.message)
            .await?;
        last_mid = Some(sent.message_id);
    }

    let mut audio_failure = None;
    if let Some(audio) = &reply.audio {
        match instagram.send_audio(&token, recipient_id, &audio.url).await {
            Ok(sent) => last_mid = Some(sent.message_id),
            Err(err) if last_mid.is_some() => audio_failure = Some(err),
            Err(err) => return Err(err.into()),
        }
    }

    let stored = messages
        .record(NewMessage {
            automation_id: automation.id,
            sender_id: integration.external_account_id.clone(),
            receiver_id: recipient_id.to_string(),
            text: reply.message.clone(),
            direction: MessageDirection::Outbound,
            platform_message_id: last_mid,
        })
        .await?;

    if let Some(err) = audio_failure {
        warn!(
            integration_id = %integration.id,
            automation_id = %automation.id,
            recipient_id = %recipient_id,
            message_id = %stored.id,
            error = %err,
            "Reply text delivered but audio failed"
        );
        return Err(err.into());
    }

    info!(
        integration_id = %integration.id,
        automation_id = %automation.id,
        recipient_id = %recipient_id,
        "Reply delivered"
    );
    Ok(stored)
}
