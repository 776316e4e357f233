//! Migration to create the calendar_integrations table.
//!
//! One row per user holding the encrypted Cal.com OAuth token pair and the
//! managed-user identity the tokens belong to.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CalendarIntegrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CalendarIntegrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::UserId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::Provider)
                            .text()
                            .not_null()
                            .default("CAL"),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::CalManagedUserId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::CalUsername)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::AccessTokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::RefreshTokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CalendarIntegrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_integrations_user_id")
                            .from(CalendarIntegrations::Table, CalendarIntegrations::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_calendar_integrations_user_id")
                    .table(CalendarIntegrations::Table)
                    .col(CalendarIntegrations::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_calendar_integrations_user_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CalendarIntegrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CalendarIntegrations {
    Table,
    Id,
    UserId,
    Provider,
    CalManagedUserId,
    CalUsername,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    AccessTokenExpiresAt,
    RefreshTokenExpiresAt,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
