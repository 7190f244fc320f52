//! # Automations API Handlers

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{UserExtension, UserHeader};
use crate::error::{ApiError, not_found, validation_error};
use crate::models::automation;
use crate::server::AppState;

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResponse {
    pub id: Uuid,
    #[schema(example = "Welcome replies")]
    pub name: String,
    pub active: bool,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<automation::Model> for AutomationResponse {
    fn from(model: automation::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            active: model.active,
            user_id: model.owner_user_id,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateAutomationRequest {
    pub name: String,
    /// Defaults to `true`
    pub active: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateAutomationRequest {
    pub name: Option<String>,
    pub active: Option<bool>,
}

fn validate_name(name: &str) -> Result<String, ApiError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        return Err(validation_error(
            "Invalid automation name",
            serde_json::json!({ "name": "must be 1-255 characters" }),
        ));
    }
    Ok(trimmed.to_string())
}

/// List the user's automations
#[utoipa::path(
    get,
    path = "/automations",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Automations of the user", body = Vec<AutomationResponse>),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "automations"
)]
pub async fn list_automations(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
) -> Result<Json<Vec<AutomationResponse>>, ApiError> {
    let automations = state.automation_repo().list_by_owner(&user.0).await?;
    Ok(Json(automations.into_iter().map(Into::into).collect()))
}

/// Create an automation
#[utoipa::path(
    post,
    path = "/automations",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = CreateAutomationRequest,
    responses(
        (status = 201, description = "Automation created", body = AutomationResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "automations"
)]
pub async fn create_automation(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    payload: Result<Json<CreateAutomationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AutomationResponse>), ApiError> {
    let Json(request) = payload?;
    let name = validate_name(&request.name)?;

    let model = state
        .automation_repo()
        .create(&user.0, &name, request.active.unwrap_or(true))
        .await?;
    info!(automation_id = %model.id, owner_user_id = %user.0, "Automation created");

    Ok((StatusCode::CREATED, Json(model.into())))
}

/// Rename or toggle an automation
#[utoipa::path(
    patch,
    path = "/automations/{id}",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("id" = Uuid, Path, description = "Automation id")
    ),
    request_body = UpdateAutomationRequest,
    responses(
        (status = 200, description = "Automation updated", body = AutomationResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 404, description = "Automation not found", body = ApiError)
    ),
    tag = "automations"
)]
pub async fn update_automation(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateAutomationRequest>, JsonRejection>,
) -> Result<Json<AutomationResponse>, ApiError> {
    let Json(request) = payload?;
    let name = request.name.as_deref().map(validate_name).transpose()?;

    state
        .automation_repo()
        .update_for_owner(&user.0, &id, name, request.active)
        .await?
        .map(|model| Json(model.into()))
        .ok_or_else(|| not_found("Automation not found"))
}

/// Delete an automation and its messages
#[utoipa::path(
    delete,
    path = "/automations/{id}",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("id" = Uuid, Path, description = "Automation id")
    ),
    responses(
        (status = 204, description = "Automation deleted"),
        (status = 404, description = "Automation not found", body = ApiError)
    ),
    tag = "automations"
)]
pub async fn delete_automation(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.automation_repo().delete_for_owner(&user.0, &id).await? {
        info!(automation_id = %id, owner_user_id = %user.0, "Automation deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Automation not found"))
    }
}
