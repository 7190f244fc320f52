//! # Token Refresh Service
//!
//! Instagram long-lived tokens expire after 60 days unless refreshed. A tick
//! scans every integration, refreshes the ones expiring within the configured
//! threshold concurrently, and waits for all of them to settle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::TokenRefreshConfig;
use crate::instagram::{InstagramApi, PlatformError};
use crate::models::PLATFORM_INSTAGRAM;
use crate::models::integration;
use crate::repositories::IntegrationRepository;

/// Counts for one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RefreshSummary {
    /// Integrations inspected
    pub scanned: usize,
    /// Integrations within the refresh threshold
    pub eligible: usize,
    /// Refreshed tokens that were also persisted
    pub refreshed: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("integration not found")]
    NotFound,
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Outcome of a single successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub integration_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct TokenRefreshService {
    config: TokenRefreshConfig,
    integrations: IntegrationRepository,
    instagram: Arc<dyn InstagramApi>,
}

/// Whether an integration's token should be refreshed at `now`.
///
/// Integrations without a known expiry are left alone; already expired ones
/// are still attempted.
pub fn is_eligible(integration: &integration::Model, now: DateTime<Utc>, threshold: Duration) -> bool {
    if integration.platform != PLATFORM_INSTAGRAM {
        return false;
    }
    match integration.expires_at {
        Some(expires_at) => expires_at.with_timezone(&Utc) <= now + threshold,
        None => false,
    }
}

impl TokenRefreshService {
    pub fn new(
        config: TokenRefreshConfig,
        integrations: IntegrationRepository,
        instagram: Arc<dyn InstagramApi>,
    ) -> Self {
        Self {
            config,
            integrations,
            instagram,
        }
    }

    /// Run the refresh loop until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.tick_seconds,
            threshold_seconds = self.config.threshold_seconds,
            "Starting token refresh service"
        );
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Token refresh tick failed");
                    }
                }
            }
        }

        info!("Token refresh service stopped");
    }

    /// Refreshes every eligible integration concurrently and waits for all.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> anyhow::Result<RefreshSummary> {
        let tick_started = std::time::Instant::now();
        let now = Utc::now();
        let threshold = Duration::seconds(self.config.threshold_seconds as i64);

        let all = self.integrations.list_all().await?;
        let mut summary = RefreshSummary {
            scanned: all.len(),
            ..Default::default()
        };

        let due: Vec<_> = all
            .into_iter()
            .filter(|integration| is_eligible(integration, now, threshold))
            .collect();
        summary.eligible = due.len();

        info!(
            scanned = summary.scanned,
            eligible = summary.eligible,
            "Found integrations due for token refresh"
        );

        let mut handles = Vec::with_capacity(due.len());
        for integration in due {
            let service = self.clone();
            let integration_id = integration.id;
            handles.push((
                integration_id,
                tokio::spawn(async move { service.refresh_integration(integration).await }),
            ));
        }

        for (integration_id, handle) in handles {
            match handle.await {
                Ok(Ok(_)) => summary.refreshed += 1,
                Ok(Err(err)) => {
                    summary.failed += 1;
                    warn!(integration_id = %integration_id, error = %err, "Token refresh failed, keeping stale token");
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(integration_id = %integration_id, error = ?err, "Refresh task panicked or was cancelled");
                }
            }
        }

        counter!("token_refresh_success_total").increment(summary.refreshed as u64);
        counter!("token_refresh_failure_total").increment(summary.failed as u64);
        histogram!("token_refresh_tick_duration_ms")
            .record(tick_started.elapsed().as_secs_f64() * 1_000.0);

        debug!(?summary, "Token refresh tick completed");
        Ok(summary)
    }

    /// Refreshes one of `owner_user_id`'s integrations on demand.
    pub async fn refresh_one(
        &self,
        owner_user_id: &Uuid,
        integration_id: &Uuid,
    ) -> Result<RefreshedToken, RefreshError> {
        let integration = self
            .integrations
            .find_for_owner(owner_user_id, integration_id)
            .await?
            .ok_or(RefreshError::NotFound)?;

        self.refresh_integration(integration).await
    }

    /// Exchanges the integration's token for a fresh one and stores it.
    #[instrument(skip_all, fields(integration_id = %integration.id))]
    pub async fn refresh_integration(
        &self,
        integration: integration::Model,
    ) -> Result<RefreshedToken, RefreshError> {
        let current = self.integrations.decrypt_token(&integration)?;
        let fresh = self
            .instagram
            .refresh_access_token(current.trim())
            .await?;

        let expires_at = (fresh.expires_in > 0).then(|| Utc::now() + Duration::seconds(fresh.expires_in));
        let updated = self
            .integrations
            .update_token(&integration.id, &fresh.access_token, expires_at)
            .await?;

        info!(
            owner_user_id = %integration.owner_user_id,
            expires_at = ?expires_at,
            "Refreshed Instagram access token"
        );

        Ok(RefreshedToken {
            integration_id: updated.id,
            expires_at: updated.expires_at.map(|dt| dt.with_timezone(&Utc)),
        })
    }
}
