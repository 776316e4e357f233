//! Calendar integration entity model
//!
//! Stores the Cal.com managed-user identity of a local user together with the
//! encrypted OAuth token pair issued for it.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Provider tag stored on every integration row
pub const PROVIDER_CAL: &str = "CAL";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "calendar_integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user (one integration per user)
    #[sea_orm(unique)]
    pub user_id: Uuid,

    pub provider: String,

    /// Cal.com managed user id, required for forced token refresh
    pub cal_managed_user_id: Option<i64>,

    pub cal_username: Option<String>,

    /// Encrypted access token ciphertext
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// Encrypted refresh token ciphertext
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    pub access_token_expires_at: Option<DateTimeWithTimeZone>,

    pub refresh_token_expires_at: Option<DateTimeWithTimeZone>,

    /// Stamped after every successful event type reconciliation
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Returns true when the access token expires within `lead` of `now`.
    /// An unknown expiry is treated as still valid.
    pub fn access_token_expires_within(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        lead: chrono::Duration,
    ) -> bool {
        match self.access_token_expires_at {
            Some(expires_at) => expires_at.with_timezone(&chrono::Utc) <= now + lead,
            None => false,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(has_many = "super::cal_event_type::Entity")]
    CalEventType,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::cal_event_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CalEventType.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn integration(expires_in: Option<Duration>) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            provider: PROVIDER_CAL.to_string(),
            cal_managed_user_id: Some(7),
            cal_username: None,
            access_token_ciphertext: None,
            refresh_token_ciphertext: None,
            access_token_expires_at: expires_in.map(|d| (now + d).into()),
            refresh_token_expires_at: None,
            last_synced_at: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn expiry_inside_lead_time_is_detected() {
        let model = integration(Some(Duration::seconds(60)));
        assert!(model.access_token_expires_within(Utc::now(), Duration::seconds(300)));
    }

    #[test]
    fn expiry_outside_lead_time_is_not_flagged() {
        let model = integration(Some(Duration::hours(2)));
        assert!(!model.access_token_expires_within(Utc::now(), Duration::seconds(300)));
    }

    #[test]
    fn unknown_expiry_is_not_flagged() {
        let model = integration(None);
        assert!(!model.access_token_expires_within(Utc::now(), Duration::seconds(300)));
    }
}
