//! # Administrative operations
//!
//! Idempotent maintenance tasks exposed under `/admin` and driven by the
//! `barid-admin` CLI.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::crypto::is_encrypted_payload;
use crate::repositories::IntegrationRepository;

/// Result of a token sanitization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SanitizeSummary {
    pub scanned: usize,
    /// Tokens rewritten (trimmed and/or re-encrypted)
    pub changed: usize,
    /// Of `changed`, rows that held legacy plaintext
    pub reencrypted: usize,
    /// Rows whose token could not be decrypted or saved
    pub failed: usize,
}

/// Trims stored access tokens and encrypts legacy plaintext ones.
///
/// Rows already trimmed and encrypted are left untouched, so a second run
/// reports `changed = 0`.
pub async fn sanitize_tokens(integrations: &IntegrationRepository) -> anyhow::Result<SanitizeSummary> {
    let all = integrations.list_all().await?;
    let mut summary = SanitizeSummary {
        scanned: all.len(),
        ..Default::default()
    };

    for integration in all {
        let token = match integrations.decrypt_token(&integration) {
            Ok(token) => token,
            Err(err) => {
                warn!(integration_id = %integration.id, error = %err, "Skipping undecryptable token");
                summary.failed += 1;
                continue;
            }
        };

        let trimmed = token.trim();
        let is_legacy = !is_encrypted_payload(&integration.access_token_ciphertext);
        if trimmed == token && !is_legacy {
            continue;
        }
        if trimmed.is_empty() {
            warn!(integration_id = %integration.id, "Stored token is blank, leaving as is");
            summary.failed += 1;
            continue;
        }

        match integrations.update_token(&integration.id, trimmed, None).await {
            Ok(_) => {
                summary.changed += 1;
                if is_legacy {
                    summary.reencrypted += 1;
                }
            }
            Err(err) => {
                warn!(integration_id = %integration.id, error = %err, "Failed to rewrite token");
                summary.failed += 1;
            }
        }
    }

    info!(
        scanned = summary.scanned,
        changed = summary.changed,
        reencrypted = summary.reencrypted,
        failed = summary.failed,
        "Token sanitization finished"
    );
    Ok(summary)
}
