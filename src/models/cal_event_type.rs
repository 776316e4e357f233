//! Local event type entity model
//!
//! Mirror of a Cal.com event type owned by a coach. Rows created locally before
//! the remote call succeeds have no `cal_event_type_id` and are ignored by the
//! reconciler.

use sea_orm::{ActiveModelBehavior, Set};
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Session format offered by an event type
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingType {
    #[default]
    #[sea_orm(string_value = "ONE_ON_ONE")]
    OneOnOne,
    #[sea_orm(string_value = "OFFICE_HOURS")]
    OfficeHours,
    #[sea_orm(string_value = "GROUP_SESSION")]
    GroupSession,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cal_event_types")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Coach owning the event type
    pub user_id: Uuid,

    pub calendar_integration_id: Uuid,

    /// Remote Cal.com id; null for local-only records
    #[sea_orm(unique)]
    pub cal_event_type_id: Option<i64>,

    pub name: String,

    pub description: Option<String>,

    pub slug: String,

    pub duration_minutes: i32,

    pub is_free: bool,

    /// Price in minor currency units
    pub price: Option<i64>,

    pub currency: Option<String>,

    pub is_active: bool,

    /// Default records are never deleted and keep their core fields
    pub is_default: bool,

    pub scheduling_type: SchedulingType,

    pub position: i32,

    /// Minimum booking notice in minutes
    pub minimum_booking_notice: i32,

    pub max_participants: Option<i32>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub discount: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub locations: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<JsonValue>,

    pub organization_id: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// Fields of an event type that mirror Cal.com and are compared during sync
#[derive(Clone, Debug, PartialEq)]
pub struct EventTypeFields {
    pub name: String,
    pub description: Option<String>,
    pub slug: String,
    pub duration_minutes: i32,
    pub is_free: bool,
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub is_active: bool,
    pub scheduling_type: SchedulingType,
    pub position: i32,
    pub minimum_booking_notice: i32,
    pub max_participants: Option<i32>,
    pub discount: Option<JsonValue>,
    pub locations: Option<JsonValue>,
    pub metadata: Option<JsonValue>,
}

impl EventTypeFields {
    pub fn of(model: &Model) -> Self {
        Self {
            name: model.name.clone(),
            description: model.description.clone(),
            slug: model.slug.clone(),
            duration_minutes: model.duration_minutes,
            is_free: model.is_free,
            price: model.price,
            currency: model.currency.clone(),
            is_active: model.is_active,
            scheduling_type: model.scheduling_type,
            position: model.position,
            minimum_booking_notice: model.minimum_booking_notice,
            max_participants: model.max_participants,
            discount: model.discount.clone(),
            locations: model.locations.clone(),
            metadata: model.metadata.clone(),
        }
    }

    /// Names of the fields that differ from `other`, in declaration order
    pub fn changed_fields(&self, other: &EventTypeFields) -> Vec<&'static str> {
        let mut changed = Vec::new();
        macro_rules! compare {
            ($($field:ident),+ $(,)?) => {
                $(if self.$field != other.$field {
                    changed.push(stringify!($field));
                })+
            };
        }
        compare!(
            name,
            description,
            slug,
            duration_minutes,
            is_free,
            price,
            currency,
            is_active,
            scheduling_type,
            position,
            minimum_booking_notice,
            max_participants,
            discount,
            locations,
            metadata,
        );
        changed
    }

    /// Writes every field onto `active`; ownership and organization linkage are
    /// left untouched
    pub fn apply_to(self, active: &mut ActiveModel) {
        active.name = Set(self.name);
        active.description = Set(self.description);
        active.slug = Set(self.slug);
        active.duration_minutes = Set(self.duration_minutes);
        active.is_free = Set(self.is_free);
        active.price = Set(self.price);
        active.currency = Set(self.currency);
        active.is_active = Set(self.is_active);
        active.scheduling_type = Set(self.scheduling_type);
        active.position = Set(self.position);
        active.minimum_booking_notice = Set(self.minimum_booking_notice);
        active.max_participants = Set(self.max_participants);
        active.discount = Set(self.discount);
        active.locations = Set(self.locations);
        active.metadata = Set(self.metadata);
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::calendar_integration::Entity",
        from = "Column::CalendarIntegrationId",
        to = "super::calendar_integration::Column::Id"
    )]
    CalendarIntegration,
}

impl Related<super::calendar_integration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CalendarIntegration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
