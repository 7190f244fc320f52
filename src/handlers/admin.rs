//! # Admin API Handlers
//!
//! Operator-only maintenance endpoints. Both operations are safe to repeat.

use axum::{extract::State, response::Json};
use tracing::info;

use crate::admin::{self, SanitizeSummary};
use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::server::AppState;
use crate::token_refresh::RefreshSummary;

/// Trim and re-encrypt every stored access token
#[utoipa::path(
    post,
    path = "/admin/integrations/sanitize-tokens",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sanitization pass finished", body = SanitizeSummary),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn sanitize_tokens(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<SanitizeSummary>, ApiError> {
    let summary = admin::sanitize_tokens(&state.integration_repo()).await?;
    info!(?summary, "Token sanitization requested by operator");
    Ok(Json(summary))
}

/// Run one token refresh pass now
#[utoipa::path(
    post,
    path = "/admin/token-refresh/run",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Refresh pass finished", body = RefreshSummary),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn run_token_refresh(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<RefreshSummary>, ApiError> {
    let summary = state.token_refresh_service.tick().await?;
    Ok(Json(summary))
}
