//! Integration entity model
//!
//! A user's connected Instagram business account together with the encrypted
//! long-lived access token used to talk to the platform on their behalf.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user (unique together with platform and external account id)
    pub owner_user_id: Uuid,

    /// Platform tag, currently always `INSTAGRAM`
    pub platform: String,

    /// Instagram-scoped account id that receives DMs
    pub external_account_id: String,

    /// Secondary account id some webhook payloads use as recipient
    pub page_id: Option<String>,

    pub page_name: Option<String>,

    /// AES-GCM ciphertext of the access token (legacy rows may be plaintext)
    pub access_token_ciphertext: Vec<u8>,

    /// When the access token stops working; `None` means unknown
    pub expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Additional authenticated data binding a token ciphertext to this row.
    pub fn token_aad(&self) -> String {
        token_aad(
            &self.owner_user_id,
            &self.platform,
            &self.external_account_id,
        )
    }

    /// Whether the webhook recipient id addresses this integration.
    pub fn matches_recipient(&self, recipient_id: &str) -> bool {
        self.external_account_id == recipient_id || self.page_id.as_deref() == Some(recipient_id)
    }
}

/// Builds the AAD string `owner|platform|external_account_id`.
pub fn token_aad(owner_user_id: &Uuid, platform: &str, external_account_id: &str) -> String {
    format!("{}|{}|{}", owner_user_id, platform, external_account_id)
}
