//! Local event type repository
//!
//! Read paths run on the pooled connection. Write paths are associated
//! functions generic over [`ConnectionTrait`] so the reconciler can run them
//! inside a transaction or savepoint.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::cal_event_type::{self, Entity as CalEventType, EventTypeFields};

/// Ownership and remote identity of a new local event type
#[derive(Debug, Clone, Copy)]
pub struct EventTypeOwner {
    pub user_id: Uuid,
    pub calendar_integration_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct EventTypeRepository {
    pub db: Arc<DatabaseConnection>,
}

impl EventTypeRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists event types of an integration ordered by position then creation
    pub async fn list_for_integration(
        &self,
        integration_id: Uuid,
    ) -> Result<Vec<cal_event_type::Model>> {
        Self::list_for_integration_with(&*self.db, integration_id).await
    }

    pub async fn list_for_integration_with<C: ConnectionTrait>(
        conn: &C,
        integration_id: Uuid,
    ) -> Result<Vec<cal_event_type::Model>> {
        Ok(CalEventType::find()
            .filter(cal_event_type::Column::CalendarIntegrationId.eq(integration_id))
            .order_by_asc(cal_event_type::Column::Position)
            .order_by_asc(cal_event_type::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<cal_event_type::Model>> {
        Ok(CalEventType::find()
            .filter(cal_event_type::Column::UserId.eq(user_id))
            .order_by_asc(cal_event_type::Column::Position)
            .order_by_asc(cal_event_type::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Finds an event type by id, scoped to its owner
    pub async fn find_for_user(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<cal_event_type::Model>> {
        Ok(CalEventType::find_by_id(id)
            .filter(cal_event_type::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn create(
        &self,
        owner: EventTypeOwner,
        cal_event_type_id: Option<i64>,
        is_default: bool,
        fields: EventTypeFields,
    ) -> Result<cal_event_type::Model> {
        Self::insert_with(&*self.db, owner, cal_event_type_id, is_default, fields).await
    }

    pub async fn update(
        &self,
        existing: cal_event_type::Model,
        fields: EventTypeFields,
    ) -> Result<cal_event_type::Model> {
        Self::update_with(&*self.db, existing, fields).await
    }

    pub async fn delete(&self, existing: &cal_event_type::Model) -> Result<()> {
        Self::delete_with(&*self.db, existing).await
    }

    pub async fn insert_with<C: ConnectionTrait>(
        conn: &C,
        owner: EventTypeOwner,
        cal_event_type_id: Option<i64>,
        is_default: bool,
        fields: EventTypeFields,
    ) -> Result<cal_event_type::Model> {
        let now = Utc::now().into();
        let mut active = cal_event_type::ActiveModel {
            id: Set(Uuid::now_v7()),
            user_id: Set(owner.user_id),
            calendar_integration_id: Set(owner.calendar_integration_id),
            cal_event_type_id: Set(cal_event_type_id),
            is_default: Set(is_default),
            organization_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        fields.apply_to(&mut active);
        Ok(active.insert(conn).await?)
    }

    pub async fn update_with<C: ConnectionTrait>(
        conn: &C,
        existing: cal_event_type::Model,
        fields: EventTypeFields,
    ) -> Result<cal_event_type::Model> {
        let mut active = existing.into_active_model();
        fields.apply_to(&mut active);
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(conn).await?)
    }

    pub async fn set_active_with<C: ConnectionTrait>(
        conn: &C,
        existing: cal_event_type::Model,
        is_active: bool,
    ) -> Result<cal_event_type::Model> {
        let mut active = existing.into_active_model();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(conn).await?)
    }

    /// Deletes a non-default event type. Default records are refused here as
    /// well as by every caller.
    pub async fn delete_with<C: ConnectionTrait>(
        conn: &C,
        existing: &cal_event_type::Model,
    ) -> Result<()> {
        if existing.is_default {
            return Err(anyhow!(
                "refusing to delete default event type '{}'",
                existing.id
            ));
        }
        let result = CalEventType::delete_by_id(existing.id).exec(conn).await?;
        if result.rows_affected == 0 {
            return Err(anyhow!("event type '{}' not found", existing.id));
        }
        Ok(())
    }
}
