//! Migration to create the cal_bookings table.
//!
//! Each row links a local session to the Cal.com booking identified by
//! `cal_booking_uid`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CalBookings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CalBookings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CalBookings::SessionId).uuid().null())
                    .col(ColumnDef::new(CalBookings::CoachId).uuid().not_null())
                    .col(ColumnDef::new(CalBookings::CalBookingUid).text().not_null())
                    .col(ColumnDef::new(CalBookings::CalBookingId).big_integer().null())
                    .col(
                        ColumnDef::new(CalBookings::Status)
                            .text()
                            .not_null()
                            .default("ACCEPTED"),
                    )
                    .col(
                        ColumnDef::new(CalBookings::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CalBookings::EndTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CalBookings::AttendeeEmail).text().not_null())
                    .col(ColumnDef::new(CalBookings::AttendeeName).text().null())
                    .col(
                        ColumnDef::new(CalBookings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CalBookings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cal_bookings_session_id")
                            .from(CalBookings::Table, CalBookings::SessionId)
                            .to(Sessions::Table, Sessions::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cal_bookings_coach_id")
                            .from(CalBookings::Table, CalBookings::CoachId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cal_bookings_uid")
                    .table(CalBookings::Table)
                    .col(CalBookings::CalBookingUid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_cal_bookings_uid").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(CalBookings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CalBookings {
    Table,
    Id,
    SessionId,
    CoachId,
    CalBookingUid,
    CalBookingId,
    Status,
    StartTime,
    EndTime,
    AttendeeEmail,
    AttendeeName,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
