//! # Barid API client
//!
//! Thin reqwest client over the management and admin endpoints, used by the
//! `barid-admin` CLI. Every request carries the operator bearer token.

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::admin::SanitizeSummary;
use crate::auth::USER_ID_HEADER;
use crate::handlers::integrations::{IntegrationResponse, RefreshResponse};
use crate::handlers::webhooks::WebhookAck;
use crate::instagram::webhook::{SIGNATURE_HEADER, VerificationError, sign_payload, text_message_payload};
use crate::token_refresh::RefreshSummary;

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode API response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("could not sign webhook payload: {0}")]
    Signing(#[from] VerificationError),
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    operator_token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, operator_token: impl Into<String>) -> Self {
        Self::with_http_client(Client::new(), base_url, operator_token)
    }

    pub fn with_http_client(
        http: Client,
        base_url: impl Into<String>,
        operator_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            operator_token: operator_token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.operator_token)
    }

    async fn check(response: Response) -> Result<Response, ApiClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiClientError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiClientError> {
        let response = Self::check(request.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Lists a user's integrations.
    ///
    /// A body that is not a JSON array yields an empty list and a warning
    /// rather than an error.
    pub async fn list_integrations(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<IntegrationResponse>, ApiClientError> {
        let request = self
            .request(Method::GET, "/integrations")
            .header(USER_ID_HEADER, user_id.to_string());
        let value: Value = match Self::send_json(request).await {
            Ok(value) => value,
            Err(ApiClientError::Decode(err)) => {
                warn!(owner_user_id = %user_id, error = %err, "Integrations response is not JSON");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        if !value.is_array() {
            warn!(owner_user_id = %user_id, "Integrations response is not a JSON array");
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Refreshes one integration's token.
    pub async fn refresh(
        &self,
        user_id: &Uuid,
        integration_id: &Uuid,
    ) -> Result<RefreshResponse, ApiClientError> {
        let request = self
            .request(
                Method::POST,
                &format!("/integrations/instagram/refresh/{}", integration_id),
            )
            .header(USER_ID_HEADER, user_id.to_string());
        Self::send_json(request).await
    }

    /// Runs one refresh pass over all integrations.
    pub async fn refresh_all(&self) -> Result<RefreshSummary, ApiClientError> {
        Self::send_json(self.request(Method::POST, "/admin/token-refresh/run")).await
    }

    pub async fn sanitize_tokens(&self) -> Result<SanitizeSummary, ApiClientError> {
        Self::send_json(self.request(Method::POST, "/admin/integrations/sanitize-tokens")).await
    }

    /// Posts a synthetic text DM to the webhook endpoint, signed with
    /// `app_secret` when one is given.
    pub async fn simulate_webhook(
        &self,
        recipient_id: &str,
        sender_id: &str,
        text: &str,
        app_secret: Option<&str>,
    ) -> Result<WebhookAck, ApiClientError> {
        let mid = format!("sim-{}", Uuid::new_v4());
        let payload = text_message_payload(recipient_id, sender_id, text, &mid);
        let body = serde_json::to_vec(&payload)?;

        let mut request = self
            .http
            .post(format!("{}/webhooks/instagram", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = app_secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(&body, secret)?);
        }

        Self::send_json(request.body(body)).await
    }
}
