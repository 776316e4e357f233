//! Cal.com booking repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::cal_booking::{self, BookingStatus, Entity as CalBooking};

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub session_id: Option<Uuid>,
    pub coach_id: Uuid,
    pub cal_booking_uid: String,
    pub cal_booking_id: Option<i64>,
    pub status: BookingStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attendee_email: String,
    pub attendee_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BookingRepository {
    pub db: Arc<DatabaseConnection>,
}

impl BookingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<cal_booking::Model>> {
        Ok(CalBooking::find_by_id(id).one(&*self.db).await?)
    }

    /// Bookings linked to a session, newest first
    pub async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<cal_booking::Model>> {
        Ok(CalBooking::find()
            .filter(cal_booking::Column::SessionId.eq(session_id))
            .order_by_desc(cal_booking::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn create(&self, new: NewBooking) -> Result<cal_booking::Model> {
        Self::insert_with(&*self.db, new).await
    }

    pub async fn insert_with<C: ConnectionTrait>(
        conn: &C,
        new: NewBooking,
    ) -> Result<cal_booking::Model> {
        let now = Utc::now().into();
        let active = cal_booking::ActiveModel {
            id: Set(Uuid::now_v7()),
            session_id: Set(new.session_id),
            coach_id: Set(new.coach_id),
            cal_booking_uid: Set(new.cal_booking_uid),
            cal_booking_id: Set(new.cal_booking_id),
            status: Set(new.status),
            start_time: Set(new.start_time.into()),
            end_time: Set(new.end_time.into()),
            attendee_email: Set(new.attendee_email),
            attendee_name: Set(new.attendee_name),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(active.insert(conn).await?)
    }

    /// Returns the number of rows updated
    pub async fn set_status_with<C: ConnectionTrait>(
        conn: &C,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<u64> {
        let result = CalBooking::update_many()
            .col_expr(cal_booking::Column::Status, Expr::value(status))
            .col_expr(
                cal_booking::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(cal_booking::Column::Id.eq(booking_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}
