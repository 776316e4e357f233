//! Cal.com booking entity model
//!
//! Links a local session to the remote booking it was created from.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Remote booking status as mirrored locally
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    #[sea_orm(string_value = "ACCEPTED")]
    Accepted,
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
}

impl BookingStatus {
    /// Maps a Cal.com booking status string; unknown values are treated as pending
    pub fn from_remote(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "accepted" => BookingStatus::Accepted,
            "cancelled" | "canceled" => BookingStatus::Cancelled,
            "rejected" => BookingStatus::Rejected,
            _ => BookingStatus::Pending,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cal_bookings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub session_id: Option<Uuid>,

    pub coach_id: Uuid,

    /// Remote booking uid used by the cancel endpoint
    #[sea_orm(unique)]
    pub cal_booking_uid: String,

    pub cal_booking_id: Option<i64>,

    pub status: BookingStatus,

    pub start_time: DateTimeWithTimeZone,

    pub end_time: DateTimeWithTimeZone,

    pub attendee_email: String,

    pub attendee_name: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::session::Entity",
        from = "Column::SessionId",
        to = "super::session::Column::Id"
    )]
    Session,
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
