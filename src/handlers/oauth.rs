//! # OAuth code exchange
//!
//! Completes the Instagram login flow: the frontend forwards the
//! authorization code and the service stores the resulting long-lived token.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::{UserExtension, UserHeader};
use crate::error::{ApiError, upstream_error, validation_error};
use crate::handlers::integrations::IntegrationResponse;
use crate::instagram::PlatformError;
use crate::repositories::NewIntegration;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExchangeCodeRequest {
    /// Authorization code from the Instagram redirect
    pub code: String,
}

/// Exchange an OAuth authorization code and connect the account
#[utoipa::path(
    post,
    path = "/integrations/instagram/oauth/exchange",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = ExchangeCodeRequest,
    responses(
        (status = 201, description = "Account connected", body = IntegrationResponse),
        (status = 200, description = "Account was already connected; token replaced", body = IntegrationResponse),
        (status = 400, description = "Missing code", body = ApiError),
        (status = 502, description = "Instagram rejected the exchange", body = ApiError),
        (status = 503, description = "Instagram credentials not configured", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn exchange_code(
    State(state): State<AppState>,
    UserExtension(user): UserExtension,
    payload: Result<Json<ExchangeCodeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IntegrationResponse>), ApiError> {
    let Json(request) = payload?;
    let code = request.code.trim();
    if code.is_empty() {
        return Err(validation_error(
            "Missing authorization code",
            serde_json::json!({ "code": "must not be empty" }),
        ));
    }

    let account = state.instagram.exchange_code(code).await.map_err(|err| {
        warn!(owner_user_id = %user.0, error = %err, "OAuth code exchange failed");
        match err {
            PlatformError::NotConfigured(what) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "NOT_CONFIGURED",
                format!("Instagram OAuth is not configured: {}", what),
            ),
            PlatformError::Http { status, body } => {
                upstream_error("instagram", Some(status), Some(body))
            }
            other => upstream_error("instagram", None, Some(other.to_string())),
        }
    })?;

    // Webhooks address the professional account id when Instagram reports one.
    let external_account_id = account
        .user_id
        .clone()
        .unwrap_or_else(|| account.account_id.clone());
    let page_id = (external_account_id != account.account_id).then(|| account.account_id.clone());
    let expires_at =
        (account.token.expires_in > 0).then(|| Utc::now() + Duration::seconds(account.token.expires_in));

    let repo = state.integration_repo();
    let (model, created) = repo
        .upsert(NewIntegration {
            owner_user_id: user.0,
            external_account_id,
            page_id,
            page_name: account.username,
            access_token: account.token.access_token,
            expires_at,
        })
        .await?;

    info!(
        integration_id = %model.id,
        owner_user_id = %user.0,
        created,
        "Instagram account connected via OAuth"
    );

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(IntegrationResponse::from_model(&repo, model)?)))
}
