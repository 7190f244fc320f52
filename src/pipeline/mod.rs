//! # Inbound DM pipeline
//!
//! Each messaging event of a webhook delivery runs through explicit stages:
//! classify, find the integration, resolve the automation, persist the
//! inbound DM, ask the agent and dispatch the reply. Every stage returns a
//! `Result`; a failed event is logged and never affects its siblings.

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, info, warn};
use utoipa::ToSchema;

use crate::agent::{AgentGateway, GatewayError};
use crate::instagram::webhook::WebhookPayload;
use crate::instagram::{InstagramApi, PlatformError};
use crate::models::{automation, integration};
use crate::repositories::{AutomationRepository, IntegrationRepository, MessageRepository};

pub mod dispatch;
pub mod ingest;

pub use ingest::{InboundDm, SkipReason};

/// Coarse classification used for logging, metrics and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    NotFound,
    UpstreamFailure,
    Internal,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("no integration for recipient {recipient_id}")]
    IntegrationNotFound { recipient_id: String },

    #[error("no active automation for owner {owner_user_id}")]
    NoActiveAutomation { owner_user_id: uuid::Uuid },

    #[error("agent gateway failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("reply dispatch failed: {0}")]
    Dispatch(#[from] PlatformError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl StageError {
    pub fn kind(&self) -> StageErrorKind {
        match self {
            StageError::IntegrationNotFound { .. } | StageError::NoActiveAutomation { .. } => {
                StageErrorKind::NotFound
            }
            StageError::Gateway(_) | StageError::Dispatch(_) => StageErrorKind::UpstreamFailure,
            StageError::Storage(_) => StageErrorKind::Internal,
        }
    }
}

/// What happened to a single messaging event.
#[derive(Debug)]
pub enum EventOutcome {
    Replied {
        automation_id: uuid::Uuid,
        platform_message_id: Option<String>,
    },
    Skipped(SkipReason),
    Failed(StageError),
}

impl EventOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EventOutcome::Replied { .. } => "replied",
            EventOutcome::Skipped(_) => "skipped",
            EventOutcome::Failed(err) => match err.kind() {
                StageErrorKind::NotFound => "not_found",
                StageErrorKind::UpstreamFailure => "upstream_failure",
                StageErrorKind::Internal => "internal",
            },
        }
    }
}

/// Per-delivery counts returned to the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WebhookSummary {
    pub events: usize,
    pub replied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WebhookSummary {
    fn record(&mut self, outcome: &EventOutcome) {
        self.events += 1;
        match outcome {
            EventOutcome::Replied { .. } => self.replied += 1,
            EventOutcome::Skipped(_) => self.skipped += 1,
            EventOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Dependencies of the pipeline, all passed in explicitly.
#[derive(Clone)]
pub struct MessagePipeline {
    integrations: IntegrationRepository,
    automations: AutomationRepository,
    messages: MessageRepository,
    agent: Arc<dyn AgentGateway>,
    instagram: Arc<dyn InstagramApi>,
}

impl MessagePipeline {
    pub fn new(
        integrations: IntegrationRepository,
        automations: AutomationRepository,
        messages: MessageRepository,
        agent: Arc<dyn AgentGateway>,
        instagram: Arc<dyn InstagramApi>,
    ) -> Self {
        Self {
            integrations,
            automations,
            messages,
            agent,
            instagram,
        }
    }

    /// Processes every messaging event of a delivery, in order.
    pub async fn process_payload(&self, payload: &WebhookPayload) -> WebhookSummary {
        let mut summary = WebhookSummary::default();

        for entry in &payload.entry {
            for event in &entry.messaging {
                let outcome = match ingest::classify(&entry.id, event) {
                    Ok(dm) => self.process_dm(dm).await,
                    Err(reason) => EventOutcome::Skipped(reason),
                };

                counter!("webhook_events_total", "outcome" => outcome.label()).increment(1);
                summary.record(&outcome);
            }
        }

        info!(
            events = summary.events,
            replied = summary.replied,
            skipped = summary.skipped,
            failed = summary.failed,
            "Processed webhook delivery"
        );
        summary
    }

    /// Runs the stages for one classified DM and logs any failure.
    pub async fn process_dm(&self, dm: InboundDm) -> EventOutcome {
        let sender_id = dm.sender_id.clone();
        let recipient_id = dm.recipient_id.clone();

        match self.run_stages(dm).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match err.kind() {
                    StageErrorKind::NotFound => info!(
                        sender_id = %sender_id,
                        recipient_id = %recipient_id,
                        error = %err,
                        "Dropping DM"
                    ),
                    // Logged with integration context where they occur.
                    StageErrorKind::UpstreamFailure => {}
                    StageErrorKind::Internal => warn!(
                        sender_id = %sender_id,
                        recipient_id = %recipient_id,
                        error = %err,
                        "DM processing failed"
                    ),
                }
                EventOutcome::Failed(err)
            }
        }
    }

    async fn run_stages(&self, dm: InboundDm) -> Result<EventOutcome, StageError> {
        let integration = ingest::lookup_integration(&self.integrations, &dm).await?;
        let automation = ingest::resolve_automation(&self.automations, &integration).await?;

        let span = tracing::info_span!(
            "dm",
            integration_id = %integration.id,
            automation_id = %automation.id,
            sender_id = %dm.sender_id,
        );
        self.reply(dm, integration, automation).instrument(span).await
    }

    async fn reply(
        &self,
        dm: InboundDm,
        integration: integration::Model,
        automation: automation::Model,
    ) -> Result<EventOutcome, StageError> {
        ingest::persist_inbound(&self.messages, &automation, &dm).await?;

        let reply = ingest::request_reply(self.agent.as_ref(), &dm)
            .await
            .inspect_err(|err| {
                counter!("agent_gateway_failures_total").increment(1);
                warn!(error = %err, "Agent gateway failed, no reply sent");
            })?;

        let outbound = dispatch::dispatch_reply(
            &self.integrations,
            self.instagram.as_ref(),
            &self.messages,
            &integration,
            &automation,
            &dm.sender_id,
            &reply,
        )
        .await
        .inspect_err(|err| {
            counter!("reply_dispatch_failures_total").increment(1);
            warn!(error = %err, "Reply dispatch failed");
        })?;

        Ok(EventOutcome::Replied {
            automation_id: automation.id,
            platform_message_id: outbound.platform_message_id,
        })
    }
}
