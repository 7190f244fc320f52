//! # Messages API Handlers

use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{UserExtension, UserHeader};
use crate::error::{ApiError, not_found, validation_error};
use crate::models::message::{self, MessageDirection};
use crate::server::AppState;

const DEFAULT_LIMIT: u64 = 100;
const MAX_LIMIT: u64 = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListMessagesQuery {
    /// Maximum number of messages (1-500, default 100)
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub direction: MessageDirection,
    pub platform_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<message::Model> for MessageResponse {
    type Error = ApiError;

    fn try_from(model: message::Model) -> Result<Self, Self::Error> {
        let direction = model.direction.parse::<MessageDirection>().map_err(|_| {
            ApiError::from(anyhow::anyhow!(
                "message {} has unknown direction '{}'",
                model.id,
                model.direction
            ))
        })?;

        Ok(Self {
            id: model.id,
            automation_id: model.automation_id,
            sender_id: model.sender_id,
            receiver_id: model.receiver_id,
            text: model.text,
            direction,
            platform_message_id: model.platform_message_id,
            created_at: model.created_at.with_timezone(&Utc),
        })
    }
}

/// List the DMs of an automation, oldest first
#[utoipa::path(
    get,
    path = "/automations/{id}/messages",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("id" = Uuid, Path, description = "Automation id"),
        ListMessagesQuery
    ),
    responses(
        (status = 200, description = "Messages of the automation", body = Vec<MessageResponse>),
        (status = 400, description = "Invalid limit", body = ApiError),
        (status = 404, description = "Automation not found", body = ApiError)
    ),
    tag = "automations"
)]
pub async fn list_messages(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(validation_error(
            "Invalid limit",
            serde_json::json!({ "limit": "must be between 1 and 500" }),
        ));
    }

    state
        .automation_repo()
        .find_for_owner(&user.0, &id)
        .await?
        .ok_or_else(|| not_found("Automation not found"))?;

    let messages = state.message_repo().list_by_automation(&id, limit).await?;
    let body = messages
        .into_iter()
        .map(MessageResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(body))
}
