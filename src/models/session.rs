//! Coaching session entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle state of a session. `Completed` and `Cancelled` are terminal.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[sea_orm(string_value = "SCHEDULED")]
    Scheduled,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Scheduled, SessionStatus::Cancelled)
                | (SessionStatus::Scheduled, SessionStatus::Completed)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub coach_id: Uuid,

    pub mentee_id: Uuid,

    /// Local event type the session was booked from
    pub cal_event_type_id: Option<Uuid>,

    pub status: SessionStatus,

    pub start_time: DateTimeWithTimeZone,

    pub end_time: DateTimeWithTimeZone,

    pub cancellation_reason: Option<String>,

    /// User who cancelled the session
    pub cancelled_by: Option<Uuid>,

    pub cancelled_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.coach_id == user_id || self.mentee_id == user_id
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cal_booking::Entity")]
    CalBooking,
}

impl Related<super::cal_booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CalBooking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
