//! Migration to create the messages table.
//!
//! Messages are the append-only log of direct messages handled under an
//! automation, in both directions.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Messages::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Messages::AutomationId).uuid().not_null())
                    .col(ColumnDef::new(Messages::SenderId).text().not_null())
                    .col(ColumnDef::new(Messages::ReceiverId).text().not_null())
                    .col(ColumnDef::new(Messages::Text).text().not_null())
                    .col(ColumnDef::new(Messages::Direction).text().not_null())
                    .col(ColumnDef::new(Messages::PlatformMessageId).text().null())
                    .col(
                        ColumnDef::new(Messages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_messages_automation_id")
                            .from(Messages::Table, Messages::AutomationId)
                            .to(Automations::Table, Automations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_messages_automation_created")
                    .table(Messages::Table)
                    .col(Messages::AutomationId)
                    .col(Messages::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_messages_automation_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Messages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
    AutomationId,
    SenderId,
    ReceiverId,
    Text,
    Direction,
    PlatformMessageId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Automations {
    Table,
    Id,
}
