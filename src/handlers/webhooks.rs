//! # Instagram webhook endpoints
//!
//! Public routes called by the platform. `GET` answers the subscription
//! handshake; `POST` receives message deliveries and runs the DM pipeline.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, unauthorized};
use crate::instagram::webhook::{
    INSTAGRAM_OBJECT, SIGNATURE_HEADER, WebhookPayload, verify_signature,
};
use crate::pipeline::WebhookSummary;
use crate::server::AppState;

/// Subscription handshake parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct HubChallengeQuery {
    #[serde(rename = "hub.mode")]
    #[param(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    #[param(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    #[param(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Acknowledgement returned for every accepted delivery
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    #[schema(example = "accepted")]
    pub status: String,
    #[serde(flatten)]
    pub summary: WebhookSummary,
}

/// Webhook subscription handshake
#[utoipa::path(
    get,
    path = "/webhooks/instagram",
    params(HubChallengeQuery),
    responses(
        (status = 200, description = "Challenge echoed back", body = String),
        (status = 403, description = "Mode or verify token mismatch")
    ),
    tag = "webhooks"
)]
pub async fn verify_subscription(
    State(state): State<AppState>,
    Query(query): Query<HubChallengeQuery>,
) -> Response {
    let expected = state.config.webhook_verify_token.as_deref();

    let token_matches = match (expected, query.verify_token.as_deref()) {
        (Some(expected), Some(provided)) => {
            bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
        }
        _ => false,
    };

    if query.mode.as_deref() == Some("subscribe") && token_matches {
        info!("Instagram webhook subscription verified");
        (StatusCode::OK, query.challenge.unwrap_or_default()).into_response()
    } else {
        warn!(mode = ?query.mode, "Rejected webhook subscription handshake");
        StatusCode::FORBIDDEN.into_response()
    }
}

/// Receive an Instagram messaging delivery
#[utoipa::path(
    post,
    path = "/webhooks/instagram",
    request_body(content = String, description = "Raw Instagram webhook JSON", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery accepted; per-event failures are reported in the counts", body = WebhookAck),
        (status = 400, description = "Body is not an Instagram delivery", body = ApiError),
        (status = 401, description = "Signature missing or invalid", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    if let Some(secret) = state.config.webhook_app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        verify_signature(&body, signature, secret).map_err(|err| {
            warn!(error = %err, "Webhook signature verification failed");
            unauthorized(Some("Invalid webhook signature"))
        })?;
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("Invalid webhook payload: {}", err),
        )
    })?;

    if payload.object != INSTAGRAM_OBJECT {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("Unsupported webhook object '{}'", payload.object),
        ));
    }

    let summary = state.pipeline().process_payload(&payload).await;

    Ok(Json(WebhookAck {
        status: "accepted".to_string(),
        summary,
    }))
}
