//! Migration to create the integrations table.
//!
//! Integrations bind a user to an external social-platform account and hold
//! the encrypted long-lived access token for that account.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Integrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Integrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Integrations::OwnerUserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Integrations::Platform)
                            .text()
                            .not_null()
                            .default("INSTAGRAM"),
                    )
                    .col(
                        ColumnDef::new(Integrations::ExternalAccountId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Integrations::PageId).text().null())
                    .col(ColumnDef::new(Integrations::PageName).text().null())
                    .col(
                        ColumnDef::new(Integrations::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Integrations::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Integrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Integrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one integration per (owner, platform, external account)
        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_owner_platform_external")
                    .table(Integrations::Table)
                    .col(Integrations::OwnerUserId)
                    .col(Integrations::Platform)
                    .col(Integrations::ExternalAccountId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Webhook lookups resolve by external account id or page id
        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_external_account_id")
                    .table(Integrations::Table)
                    .col(Integrations::ExternalAccountId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_page_id")
                    .table(Integrations::Table)
                    .col(Integrations::PageId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_integrations_owner_platform_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_integrations_external_account_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_integrations_page_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Integrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
    OwnerUserId,
    Platform,
    ExternalAccountId,
    PageId,
    PageName,
    AccessTokenCiphertext,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}
