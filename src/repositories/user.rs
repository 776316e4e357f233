//! User repository

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::user::{self, Entity as User, UserRole};

#[derive(Debug, Clone)]
pub struct UserRepository {
    pub db: Arc<DatabaseConnection>,
}

impl UserRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<user::Model>> {
        Ok(User::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>> {
        Ok(User::find()
            .filter(user::Column::Email.eq(email.trim().to_lowercase()))
            .one(&*self.db)
            .await?)
    }

    /// Inserts a user; the email is stored lowercased
    pub async fn create(
        &self,
        email: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        role: UserRole,
    ) -> Result<user::Model> {
        let now = Utc::now().into();
        let model = user::ActiveModel {
            id: Set(Uuid::now_v7()),
            email: Set(email.trim().to_lowercase()),
            first_name: Set(first_name.map(str::to_string)),
            last_name: Set(last_name.map(str::to_string)),
            role: Set(role),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }
}
