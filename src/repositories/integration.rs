//! Integration repository
//!
//! Stores Instagram integrations with their access tokens encrypted at rest.
//! Tokens are trimmed of surrounding whitespace before every write.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::crypto::{CryptoKey, decrypt_integration_token, encrypt_token, is_encrypted_payload};
use crate::models::PLATFORM_INSTAGRAM;
use crate::models::integration::{self, Entity as Integration, token_aad};

/// Fields required to connect a new Instagram account.
#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub owner_user_id: Uuid,
    pub external_account_id: String,
    pub page_id: Option<String>,
    pub page_name: Option<String>,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct IntegrationRepository {
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
}

impl IntegrationRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Inserts a new integration. A duplicate `(owner, platform, account)` fails
    /// with the database's unique violation.
    pub async fn create(&self, new: NewIntegration) -> Result<integration::Model> {
        let token = new.access_token.trim();
        if token.is_empty() {
            return Err(anyhow!("access token must not be empty"));
        }

        let aad = token_aad(&new.owner_user_id, PLATFORM_INSTAGRAM, &new.external_account_id);
        let ciphertext = encrypt_token(&self.crypto_key, &aad, token)
            .map_err(|e| anyhow!("token encryption failed: {}", e))?;

        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = integration::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_user_id: Set(new.owner_user_id),
            platform: Set(PLATFORM_INSTAGRAM.to_string()),
            external_account_id: Set(new.external_account_id),
            page_id: Set(new.page_id),
            page_name: Set(new.page_name),
            access_token_ciphertext: Set(ciphertext),
            expires_at: Set(new.expires_at.map(Into::into)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(model.insert(&*self.db).await?)
    }

    /// Creates the integration, or replaces token and profile fields when the
    /// owner already connected this account. Returns `(model, created)`.
    pub async fn upsert(&self, new: NewIntegration) -> Result<(integration::Model, bool)> {
        let Some(existing) = self
            .find_by_external_account(&new.owner_user_id, &new.external_account_id)
            .await?
        else {
            return Ok((self.create(new).await?, true));
        };

        let token = new.access_token.trim();
        if token.is_empty() {
            return Err(anyhow!("access token must not be empty"));
        }
        let ciphertext = encrypt_token(&self.crypto_key, &existing.token_aad(), token)
            .map_err(|e| anyhow!("token encryption failed: {}", e))?;

        let mut model: integration::ActiveModel = existing.into();
        model.access_token_ciphertext = Set(ciphertext);
        model.expires_at = Set(new.expires_at.map(Into::into));
        if new.page_id.is_some() {
            model.page_id = Set(new.page_id);
        }
        if new.page_name.is_some() {
            model.page_name = Set(new.page_name);
        }
        model.updated_at = Set(Utc::now().into());

        Ok((model.update(&*self.db).await?, false))
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<integration::Model>> {
        Ok(Integration::find_by_id(*id).one(&*self.db).await?)
    }

    /// Finds an integration by id within the owner's scope
    pub async fn find_for_owner(
        &self,
        owner_user_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<integration::Model>> {
        Ok(Integration::find_by_id(*id)
            .filter(integration::Column::OwnerUserId.eq(*owner_user_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_by_external_account(
        &self,
        owner_user_id: &Uuid,
        external_account_id: &str,
    ) -> Result<Option<integration::Model>> {
        Ok(Integration::find()
            .filter(integration::Column::OwnerUserId.eq(*owner_user_id))
            .filter(integration::Column::Platform.eq(PLATFORM_INSTAGRAM))
            .filter(integration::Column::ExternalAccountId.eq(external_account_id))
            .one(&*self.db)
            .await?)
    }

    /// Finds the integration addressed by a webhook recipient id.
    ///
    /// Matches `external_account_id` or `page_id`; when several users connected
    /// the same account the oldest integration wins.
    pub async fn find_by_recipient(&self, recipient_id: &str) -> Result<Option<integration::Model>> {
        Ok(Integration::find()
            .filter(integration::Column::Platform.eq(PLATFORM_INSTAGRAM))
            .filter(
                Condition::any()
                    .add(integration::Column::ExternalAccountId.eq(recipient_id))
                    .add(integration::Column::PageId.eq(recipient_id)),
            )
            .order_by_asc(integration::Column::CreatedAt)
            .order_by_asc(integration::Column::Id)
            .one(&*self.db)
            .await?)
    }

    pub async fn list_by_owner(&self, owner_user_id: &Uuid) -> Result<Vec<integration::Model>> {
        Ok(Integration::find()
            .filter(integration::Column::OwnerUserId.eq(*owner_user_id))
            .order_by_asc(integration::Column::CreatedAt)
            .order_by_asc(integration::Column::Id)
            .all(&*self.db)
            .await?)
    }

    pub async fn list_all(&self) -> Result<Vec<integration::Model>> {
        Ok(Integration::find()
            .order_by_asc(integration::Column::CreatedAt)
            .order_by_asc(integration::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Decrypts the stored access token.
    pub fn decrypt_token(&self, integration: &integration::Model) -> Result<String> {
        if !is_encrypted_payload(&integration.access_token_ciphertext) {
            tracing::warn!(
                integration_id = %integration.id,
                owner_user_id = %integration.owner_user_id,
                "Legacy plaintext access token detected"
            );
        }

        decrypt_integration_token(&self.crypto_key, integration).map_err(|e| {
            tracing::error!(integration_id = %integration.id, "Token decryption failed");
            anyhow!("token decryption failed: {}", e)
        })
    }

    /// Replaces the access token and, when given, its expiry.
    pub async fn update_token(
        &self,
        id: &Uuid,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<integration::Model> {
        let existing = Integration::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("integration '{}' not found", id))?;

        let token = access_token.trim();
        if token.is_empty() {
            return Err(anyhow!("access token must not be empty"));
        }
        let ciphertext = encrypt_token(&self.crypto_key, &existing.token_aad(), token)
            .map_err(|e| anyhow!("token encryption failed: {}", e))?;

        let mut model: integration::ActiveModel = existing.into();
        model.access_token_ciphertext = Set(ciphertext);
        if let Some(expires_at) = expires_at {
            model.expires_at = Set(Some(expires_at.into()));
        }
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Deletes an integration within the owner's scope; `false` when nothing matched.
    pub async fn delete_for_owner(&self, owner_user_id: &Uuid, id: &Uuid) -> Result<bool> {
        let result = Integration::delete_many()
            .filter(integration::Column::Id.eq(*id))
            .filter(integration::Column::OwnerUserId.eq(*owner_user_id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }
}
