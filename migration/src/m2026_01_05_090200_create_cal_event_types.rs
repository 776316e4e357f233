//! Migration to create the cal_event_types table.
//!
//! Local mirror of Cal.com event types. `cal_event_type_id` is null for records
//! that only exist locally and unique otherwise.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CalEventTypes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CalEventTypes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CalEventTypes::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(CalEventTypes::CalendarIntegrationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CalEventTypes::CalEventTypeId)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(CalEventTypes::Name).text().not_null())
                    .col(ColumnDef::new(CalEventTypes::Description).text().null())
                    .col(ColumnDef::new(CalEventTypes::Slug).text().not_null())
                    .col(
                        ColumnDef::new(CalEventTypes::DurationMinutes)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CalEventTypes::IsFree)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(CalEventTypes::Price).big_integer().null())
                    .col(ColumnDef::new(CalEventTypes::Currency).text().null())
                    .col(
                        ColumnDef::new(CalEventTypes::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(CalEventTypes::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CalEventTypes::SchedulingType)
                            .text()
                            .not_null()
                            .default("ONE_ON_ONE"),
                    )
                    .col(
                        ColumnDef::new(CalEventTypes::Position)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CalEventTypes::MinimumBookingNotice)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CalEventTypes::MaxParticipants)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(CalEventTypes::Discount).json_binary().null())
                    .col(ColumnDef::new(CalEventTypes::Locations).json_binary().null())
                    .col(ColumnDef::new(CalEventTypes::Metadata).json_binary().null())
                    .col(ColumnDef::new(CalEventTypes::OrganizationId).uuid().null())
                    .col(
                        ColumnDef::new(CalEventTypes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CalEventTypes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cal_event_types_user_id")
                            .from(CalEventTypes::Table, CalEventTypes::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cal_event_types_calendar_integration_id")
                            .from(CalEventTypes::Table, CalEventTypes::CalendarIntegrationId)
                            .to(CalendarIntegrations::Table, CalendarIntegrations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cal_event_types_cal_event_type_id")
                    .table(CalEventTypes::Table)
                    .col(CalEventTypes::CalEventTypeId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cal_event_types_integration")
                    .table(CalEventTypes::Table)
                    .col(CalEventTypes::CalendarIntegrationId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_cal_event_types_cal_event_type_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_cal_event_types_integration")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CalEventTypes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CalEventTypes {
    Table,
    Id,
    UserId,
    CalendarIntegrationId,
    CalEventTypeId,
    Name,
    Description,
    Slug,
    DurationMinutes,
    IsFree,
    Price,
    Currency,
    IsActive,
    IsDefault,
    SchedulingType,
    Position,
    MinimumBookingNotice,
    MaxParticipants,
    Discount,
    Locations,
    Metadata,
    OrganizationId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum CalendarIntegrations {
    Table,
    Id,
}
