//! Session repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::session::{self, Entity as Session, SessionStatus};

#[derive(Debug, Clone)]
pub struct NewSession {
    pub coach_id: Uuid,
    pub mentee_id: Uuid,
    pub cal_event_type_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionRepository {
    pub db: Arc<DatabaseConnection>,
}

impl SessionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<session::Model>> {
        Ok(Session::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn create(&self, new: NewSession) -> Result<session::Model> {
        Self::insert_with(&*self.db, new).await
    }

    pub async fn insert_with<C: ConnectionTrait>(
        conn: &C,
        new: NewSession,
    ) -> Result<session::Model> {
        let now = Utc::now().into();
        let active = session::ActiveModel {
            id: Set(Uuid::now_v7()),
            coach_id: Set(new.coach_id),
            mentee_id: Set(new.mentee_id),
            cal_event_type_id: Set(new.cal_event_type_id),
            status: Set(SessionStatus::Scheduled),
            start_time: Set(new.start_time.into()),
            end_time: Set(new.end_time.into()),
            cancellation_reason: Set(None),
            cancelled_by: Set(None),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(active.insert(conn).await?)
    }

    /// Moves a scheduled session to cancelled.
    ///
    /// The update is conditional on the row still being `SCHEDULED`; returns
    /// `false` when another writer got there first.
    pub async fn mark_cancelled_with<C: ConnectionTrait>(
        conn: &C,
        session_id: Uuid,
        reason: Option<&str>,
        cancelled_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let at: sea_orm::prelude::DateTimeWithTimeZone = at.into();
        let result = Session::update_many()
            .col_expr(session::Column::Status, Expr::value(SessionStatus::Cancelled))
            .col_expr(
                session::Column::CancellationReason,
                Expr::value(reason.map(str::to_string)),
            )
            .col_expr(session::Column::CancelledBy, Expr::value(Some(cancelled_by)))
            .col_expr(session::Column::CancelledAt, Expr::value(Some(at)))
            .col_expr(session::Column::UpdatedAt, Expr::value(at))
            .filter(session::Column::Id.eq(session_id))
            .filter(session::Column::Status.eq(SessionStatus::Scheduled))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
