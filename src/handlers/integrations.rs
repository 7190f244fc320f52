//! # Integrations API Handlers
//!
//! Connected Instagram accounts of a user. Responses carry the decrypted
//! access token, so these routes sit behind operator authentication.

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
use crate::error::{ApiError, not_found, upstream_error, validation_error};
use crate::instagram::PlatformError;
use crate::models::integration;
use crate::repositories::{IntegrationRepository, NewIntegration};
use crate::server::AppState;
use crate::token_refresh::RefreshError;

/// An integration as returned to API clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationResponse {
    pub id: Uuid,
    /// Page or account display name
    pub name: Option<String>,
    /// Decrypted access token
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    #[schema(example = "17841400000000000")]
    pub instagram_id: String,
    pub page_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: Uuid,
}

impl IntegrationResponse {
    pub(crate) fn from_model(
        repo: &IntegrationRepository,
        model: integration::Model,
    ) -> Result<Self, ApiError> {
        let token = repo.decrypt_token(&model)?;
        Ok(Self {
            id: model.id,
            name: model.page_name,
            token,
            expires_at: model.expires_at.map(|dt| dt.with_timezone(&Utc)),
            instagram_id: model.external_account_id,
            page_id: model.page_id,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
            user_id: model.owner_user_id,
        })
    }
}

/// Request body for connecting an account with an existing token
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntegrationRequest {
    #[schema(example = "17841400000000000")]
    pub instagram_id: String,
    pub page_id: Option<String>,
    pub name: Option<String>,
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of an on-demand token refresh
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

/// List the user's integrations
#[utoipa::path(
    get,
    path = "/integrations",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Integrations of the user", body = Vec<IntegrationResponse>),
        (status = 400, description = "Missing or invalid X-User-Id", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_integrations(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
) -> Result<Json<Vec<IntegrationResponse>>, ApiError> {
    let repo = state.integration_repo();
    let integrations = repo
        .list_by_owner(&user.0)
        .await?
        .into_iter()
        .map(|model| IntegrationResponse::from_model(&repo, model))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(integrations))
}

/// Connect an Instagram account with an already issued token
#[utoipa::path(
    post,
    path = "/integrations",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = CreateIntegrationRequest,
    responses(
        (status = 201, description = "Integration created", body = IntegrationResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Account already connected for this user", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn create_integration(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    payload: Result<Json<CreateIntegrationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IntegrationResponse>), ApiError> {
    let Json(request) = payload?;

    let instagram_id = request.instagram_id.trim();
    let mut field_errors = serde_json::Map::new();
    if instagram_id.is_empty() {
        field_errors.insert("instagramId".into(), "must not be empty".into());
    }
    if request.token.trim().is_empty() {
        field_errors.insert("token".into(), "must not be empty".into());
    }
    if !field_errors.is_empty() {
        return Err(validation_error(
            "Invalid integration",
            serde_json::Value::Object(field_errors),
        ));
    }

    let repo = state.integration_repo();
    let model = repo
        .create(NewIntegration {
            owner_user_id: user.0,
            external_account_id: instagram_id.to_string(),
            page_id: request.page_id,
            page_name: request.name,
            access_token: request.token,
            expires_at: request.expires_at,
        })
        .await?;

    info!(integration_id = %model.id, owner_user_id = %user.0, "Integration created");

    Ok((
        StatusCode::CREATED,
        Json(IntegrationResponse::from_model(&repo, model)?),
    ))
}

/// Disconnect an integration
#[utoipa::path(
    delete,
    path = "/integrations/{id}",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("id" = Uuid, Path, description = "Integration id")
    ),
    responses(
        (status = 204, description = "Integration deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn delete_integration(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.integration_repo().delete_for_owner(&user.0, &id).await? {
        info!(integration_id = %id, owner_user_id = %user.0, "Integration deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Integration not found"))
    }
}

/// Refresh one integration's long-lived token now
#[utoipa::path(
    post,
    path = "/integrations/instagram/refresh/{id}",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("id" = Uuid, Path, description = "Integration id")
    ),
    responses(
        (status = 200, description = "Token refreshed", body = RefreshResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError),
        (status = 502, description = "Instagram rejected the refresh", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn refresh_integration(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let refreshed = state
        .token_refresh_service
        .refresh_one(&user.0, &id)
        .await
        .map_err(|err| match err {
            RefreshError::NotFound => not_found("Integration not found"),
            RefreshError::Platform(err) => {
                let body = match &err {
                    PlatformError::Http { body, .. } => body.clone(),
                    other => other.to_string(),
                };
                upstream_error("instagram", err.status(), Some(body))
            }
            RefreshError::Storage(err) => ApiError::from(err),
        })?;

    Ok(Json(RefreshResponse {
        id: refreshed.integration_id,
        expires_at: refreshed.expires_at,
    }))
}
