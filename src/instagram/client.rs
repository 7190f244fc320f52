//! reqwest implementation of [`InstagramApi`].

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{ConnectedAccount, InstagramApi, LongLivedToken, PlatformError, SentMessage};
use crate::config::InstagramConfig;
use crate::error::truncate_snippet;

#[derive(Debug, Clone)]
pub struct InstagramClient {
    http: Client,
    config: InstagramConfig,
}

#[derive(Debug, Deserialize)]
struct ShortLivedToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Profile {
    id: String,
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    username: Option<String>,
}

impl InstagramClient {
    pub fn new(config: InstagramConfig) -> Self {
        Self::with_http_client(Client::new(), config)
    }

    pub fn with_http_client(http: Client, config: InstagramConfig) -> Self {
        Self { http, config }
    }

    fn graph_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.graph_base.trim_end_matches('/'), path)
    }

    fn versioned_url(&self, path: &str) -> String {
        self.graph_url(&format!("{}/{}", self.config.api_version, path))
    }

    async fn send_message(
        &self,
        access_token: &str,
        body: serde_json::Value,
    ) -> Result<SentMessage, PlatformError> {
        let response = self
            .http
            .post(self.versioned_url("me/messages"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        decode(response).await
    }
}

/// Maps non-2xx to [`PlatformError::Http`] and decodes the JSON body.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(PlatformError::Http {
            status: status.as_u16(),
            body: truncate_snippet(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| PlatformError::Malformed(e.to_string()))
}

#[async_trait]
impl InstagramApi for InstagramClient {
    async fn send_text(
        &self,
        access_token: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        self.send_message(
            access_token,
            json!({
                "recipient": { "id": recipient_id },
                "message": { "text": text },
            }),
        )
        .await
    }

    async fn send_audio(
        &self,
        access_token: &str,
        recipient_id: &str,
        audio_url: &str,
    ) -> Result<SentMessage, PlatformError> {
        self.send_message(
            access_token,
            json!({
                "recipient": { "id": recipient_id },
                "message": {
                    "attachment": {
                        "type": "audio",
                        "payload": { "url": audio_url },
                    }
                },
            }),
        )
        .await
    }

    async fn refresh_access_token(&self, access_token: &str) -> Result<LongLivedToken, PlatformError> {
        let response = self
            .http
            .get(self.graph_url("refresh_access_token"))
            .query(&[
                ("grant_type", "ig_refresh_token"),
                ("access_token", access_token),
            ])
            .send()
            .await?;

        decode(response).await
    }

    async fn exchange_code(&self, code: &str) -> Result<ConnectedAccount, PlatformError> {
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or(PlatformError::NotConfigured("client id"))?;
        let client_secret = self
            .config
            .client_secret
            .as_deref()
            .ok_or(PlatformError::NotConfigured("client secret"))?;
        let redirect_uri = self
            .config
            .redirect_uri
            .as_deref()
            .ok_or(PlatformError::NotConfigured("redirect uri"))?;

        let response = self
            .http
            .post(format!(
                "{}/oauth/access_token",
                self.config.oauth_base.trim_end_matches('/')
            ))
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .send()
            .await?;
        let short: ShortLivedToken = decode(response).await?;

        let response = self
            .http
            .get(self.graph_url("access_token"))
            .query(&[
                ("grant_type", "ig_exchange_token"),
                ("client_secret", client_secret),
                ("access_token", short.access_token.as_str()),
            ])
            .send()
            .await?;
        let token: LongLivedToken = decode(response).await?;

        let response = self
            .http
            .get(self.versioned_url("me"))
            .query(&[
                ("fields", "id,user_id,username"),
                ("access_token", token.access_token.as_str()),
            ])
            .send()
            .await?;
        let profile: Profile = decode(response).await?;

        // `user_id` comes back as a number or a string depending on API version.
        let user_id = profile.user_id.and_then(|value| match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Ok(ConnectedAccount {
            account_id: profile.id,
            user_id,
            username: profile.username,
            token,
        })
    }
}
