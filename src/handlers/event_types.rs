//! # Event Type Handlers
//!
//! Coach-facing CRUD over event types. Every mutation goes to Cal.com first and
//! the local mirror is written from the record Cal.com returns. Default event
//! types keep their name, slug, duration and scheduling type, and are never
//! deleted.

use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{RequestContext, UserHeader};
use crate::cal::{CalError, CreateEventTypeInput, Seats, UpdateEventTypeInput};
use crate::error::{ApiError, forbidden, not_found, validation_error};
use crate::event_type_sync::plan::{
    METADATA_DISCOUNT, METADATA_IS_DEFAULT, METADATA_SCHEDULING_TYPE, fields_from_remote,
    remote_is_default,
};
use crate::event_type_sync::{SyncReport, SyncRequest};
use crate::handlers::{caller_integration, require_any_role};
use crate::models::cal_event_type::{self, EventTypeFields, SchedulingType};
use crate::models::user::UserRole;
use crate::repositories::event_type::EventTypeOwner;
use crate::server::AppState;
use crate::token_refresh::TokenRefreshError;

const EVENT_TYPE_EDITORS: &[UserRole] = &[UserRole::Coach, UserRole::Admin];
const MAX_DURATION_MINUTES: i32 = 24 * 60;

/// Local event type as exposed over the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeResponse {
    #[schema(value_type = String)]
    pub id: Uuid,
    /// Cal.com id; null for records not yet published
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
    pub is_default: bool,
    pub scheduling_type: SchedulingType,
    pub position: i32,
    pub minimum_booking_notice: i32,
    pub max_participants: Option<i32>,
    #[schema(value_type = Option<Object>)]
    pub discount: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub locations: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<JsonValue>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<cal_event_type::Model> for EventTypeResponse {
    fn from(model: cal_event_type::Model) -> Self {
        Self {
            id: model.id,
            cal_event_type_id: model.cal_event_type_id,
            name: model.name,
            description: model.description,
            slug: model.slug,
            duration_minutes: model.duration_minutes,
            is_free: model.is_free,
            price: model.price,
            currency: model.currency,
            is_active: model.is_active,
            is_default: model.is_default,
            scheduling_type: model.scheduling_type,
            position: model.position,
            minimum_booking_notice: model.minimum_booking_notice,
            max_participants: model.max_participants,
            discount: model.discount,
            locations: model.locations,
            metadata: model.metadata,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeListResponse {
    pub event_types: Vec<EventTypeResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateEventTypeRequest {
    pub name: String,
    pub slug: String,
    pub duration_minutes: i32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Price in minor currency units; absent or zero means free
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub minimum_booking_notice: Option<i32>,
    /// Seats per slot; more than one makes a group session
    #[serde(default)]
    pub max_participants: Option<i32>,
    #[serde(default)]
    pub scheduling_type: Option<SchedulingType>,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub discount: Option<JsonValue>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub locations: Option<JsonValue>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateEventTypeRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub duration_minutes: Option<i32>,
    pub is_active: Option<bool>,
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub minimum_booking_notice: Option<i32>,
    pub max_participants: Option<i32>,
    pub scheduling_type: Option<SchedulingType>,
    pub position: Option<i32>,
    #[schema(value_type = Option<Object>)]
    pub discount: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub locations: Option<JsonValue>,
}

impl UpdateEventTypeRequest {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.slug.is_none()
            && self.duration_minutes.is_none()
            && self.is_active.is_none()
            && self.price.is_none()
            && self.currency.is_none()
            && self.minimum_booking_notice.is_none()
            && self.max_participants.is_none()
            && self.scheduling_type.is_none()
            && self.position.is_none()
            && self.discount.is_none()
            && self.locations.is_none()
    }

    /// Immutable fields of a default event type this patch would change
    fn default_violations(&self, existing: &cal_event_type::Model) -> Vec<&'static str> {
        let mut violations = Vec::new();
        if self.name.as_ref().is_some_and(|name| *name != existing.name) {
            violations.push("name");
        }
        if self.slug.as_ref().is_some_and(|slug| *slug != existing.slug) {
            violations.push("slug");
        }
        if self
            .duration_minutes
            .is_some_and(|duration| duration != existing.duration_minutes)
        {
            violations.push("duration_minutes");
        }
        if self
            .scheduling_type
            .is_some_and(|scheduling_type| scheduling_type != existing.scheduling_type)
        {
            violations.push("scheduling_type");
        }
        violations
    }

    /// Applies the patch to local fields of a record Cal.com does not know
    fn apply_locally(self, fields: &mut EventTypeFields) {
        if let Some(name) = self.name {
            fields.name = name;
        }
        if let Some(description) = self.description {
            fields.description = Some(description);
        }
        if let Some(slug) = self.slug {
            fields.slug = slug;
        }
        if let Some(duration) = self.duration_minutes {
            fields.duration_minutes = duration;
        }
        if let Some(is_active) = self.is_active {
            fields.is_active = is_active;
        }
        if let Some(price) = self.price {
            fields.price = (price > 0).then_some(price);
            fields.is_free = fields.price.is_none();
        }
        if let Some(currency) = self.currency {
            fields.currency = Some(currency);
        }
        if fields.is_free {
            fields.currency = None;
        }
        if let Some(notice) = self.minimum_booking_notice {
            fields.minimum_booking_notice = notice;
        }
        if let Some(max_participants) = self.max_participants {
            fields.max_participants = Some(max_participants);
        }
        if let Some(scheduling_type) = self.scheduling_type {
            fields.scheduling_type = scheduling_type;
        }
        if let Some(position) = self.position {
            fields.position = position;
        }
        if let Some(discount) = self.discount {
            fields.discount = Some(discount);
        }
        if let Some(locations) = self.locations {
            fields.locations = Some(locations);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct SyncQuery {
    /// Delete local event types missing remotely instead of deactivating them
    pub delete_missing: Option<bool>,
}

/// Lists the caller's event types ordered by position
#[utoipa::path(
    get,
    path = "/event-types",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Caller's event types", body = EventTypeListResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "event-types"
)]
pub async fn list_event_types(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<EventTypeListResponse>, ApiError> {
    let event_types = state.event_types.list_for_user(ctx.user_id).await?;
    Ok(Json(EventTypeListResponse {
        event_types: event_types.into_iter().map(EventTypeResponse::from).collect(),
    }))
}

/// Creates an event type on Cal.com and mirrors it locally
#[utoipa::path(
    post,
    path = "/event-types",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = CreateEventTypeRequest,
    responses(
        (status = 201, description = "Event type created", body = EventTypeResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 403, description = "Caller is not a coach", body = ApiError),
        (status = 404, description = "Caller has no calendar integration", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "event-types"
)]
pub async fn create_event_type(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateEventTypeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventTypeResponse>), ApiError> {
    let Json(request) = payload?;
    require_any_role(&ctx, EVENT_TYPE_EDITORS)?;
    validate_create(&request)?;

    let integration = caller_integration(&state, &ctx).await?;
    let position = request.position;
    let input = create_input(request);

    let cal = &state.cal;
    let input = &input;
    let remote = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.create_event_type(&token, input).await
        })
        .await?;

    let mut fields = fields_from_remote(&remote, None);
    if remote.position.is_none() {
        if let Some(position) = position {
            fields.position = position;
        }
    }

    let created = state
        .event_types
        .create(
            EventTypeOwner {
                user_id: ctx.user_id,
                calendar_integration_id: integration.id,
            },
            Some(remote.id),
            remote_is_default(&remote),
            fields,
        )
        .await?;

    info!(
        event_type_id = %created.id,
        cal_event_type_id = remote.id,
        "Event type created"
    );
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Updates an event type; default records keep their core fields
#[utoipa::path(
    patch,
    path = "/event-types/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Local event type id"),
        UserHeader
    ),
    request_body = UpdateEventTypeRequest,
    responses(
        (status = 200, description = "Event type updated", body = EventTypeResponse),
        (status = 400, description = "Validation error or immutable default field", body = ApiError),
        (status = 403, description = "Caller is not a coach", body = ApiError),
        (status = 404, description = "Event type not found", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "event-types"
)]
pub async fn update_event_type(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateEventTypeRequest>, JsonRejection>,
) -> Result<Json<EventTypeResponse>, ApiError> {
    let Json(request) = payload?;
    require_any_role(&ctx, EVENT_TYPE_EDITORS)?;

    if request.is_empty() {
        return Err(validation_error(
            "Request must change at least one field",
            json!({}),
        ));
    }
    validate_update(&request)?;

    let existing = state
        .event_types
        .find_for_user(ctx.user_id, id)
        .await?
        .ok_or_else(|| not_found("Event type not found"))?;

    if existing.is_default {
        let violations = request.default_violations(&existing);
        if !violations.is_empty() {
            let details: Map<String, JsonValue> = violations
                .iter()
                .map(|field| {
                    (
                        (*field).to_string(),
                        json!("Immutable on default event types"),
                    )
                })
                .collect();
            return Err(validation_error(
                "Default event types cannot change these fields",
                JsonValue::Object(details),
            ));
        }
    }

    let Some(cal_event_type_id) = existing.cal_event_type_id else {
        let mut fields = EventTypeFields::of(&existing);
        request.apply_locally(&mut fields);
        let updated = state.event_types.update(existing, fields).await?;
        return Ok(Json(updated.into()));
    };

    let position = request.position;
    let input = update_input(request, existing.metadata.as_ref());
    let cal = &state.cal;
    let input = &input;
    let remote = state
        .tokens
        .execute(existing.calendar_integration_id, |token| async move {
            cal.update_event_type(&token, cal_event_type_id, input).await
        })
        .await?;

    let mut fields = fields_from_remote(&remote, Some(&existing));
    if remote.position.is_none() {
        if let Some(position) = position {
            fields.position = position;
        }
    }
    let updated = state.event_types.update(existing, fields).await?;

    info!(event_type_id = %updated.id, cal_event_type_id, "Event type updated");
    Ok(Json(updated.into()))
}

/// Deletes an event type on Cal.com and locally; defaults are refused
#[utoipa::path(
    delete,
    path = "/event-types/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Local event type id"),
        UserHeader
    ),
    responses(
        (status = 204, description = "Event type deleted"),
        (status = 403, description = "Default event type or caller is not a coach", body = ApiError),
        (status = 404, description = "Event type not found", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "event-types"
)]
pub async fn delete_event_type(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_any_role(&ctx, EVENT_TYPE_EDITORS)?;

    let existing = state
        .event_types
        .find_for_user(ctx.user_id, id)
        .await?
        .ok_or_else(|| not_found("Event type not found"))?;

    if existing.is_default {
        return Err(forbidden(Some("Default event types cannot be deleted")));
    }

    if let Some(cal_event_type_id) = existing.cal_event_type_id {
        let cal = &state.cal;
        let result = state
            .tokens
            .execute(existing.calendar_integration_id, |token| async move {
                cal.delete_event_type(&token, cal_event_type_id).await
            })
            .await;

        match result {
            Ok(()) => {}
            Err(TokenRefreshError::Cal(CalError::Http { status: 404, .. })) => {
                warn!(cal_event_type_id, "Event type already gone on Cal.com");
            }
            Err(err) => return Err(err.into()),
        }
    }

    state.event_types.delete(&existing).await?;
    info!(event_type_id = %existing.id, "Event type deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Reconciles the caller's local event types with Cal.com
#[utoipa::path(
    post,
    path = "/event-types/sync",
    security(("bearer_auth" = [])),
    params(UserHeader, SyncQuery),
    responses(
        (status = 200, description = "Sync report; success is false when the batch was rolled back", body = SyncReport),
        (status = 403, description = "Caller is not a coach", body = ApiError),
        (status = 404, description = "Caller has no calendar integration", body = ApiError),
        (status = 502, description = "Remote event types could not be fetched", body = ApiError)
    ),
    tag = "event-types"
)]
pub async fn sync_event_types(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<SyncQuery>,
) -> Result<Json<SyncReport>, ApiError> {
    require_any_role(&ctx, EVENT_TYPE_EDITORS)?;
    let integration = caller_integration(&state, &ctx).await?;

    let report = state
        .event_type_sync
        .sync(SyncRequest {
            user_id: ctx.user_id,
            calendar_integration_id: integration.id,
            remote: Vec::new(),
            delete_missing: query.delete_missing,
        })
        .await?;

    Ok(Json(report))
}

fn validate_create(request: &CreateEventTypeRequest) -> Result<(), ApiError> {
    let mut errors = Map::new();

    if request.name.trim().is_empty() {
        errors.insert("name".into(), json!("Must not be empty"));
    }
    if !is_valid_slug(&request.slug) {
        errors.insert(
            "slug".into(),
            json!("Must be lowercase letters, digits and hyphens"),
        );
    }
    if !(1..=MAX_DURATION_MINUTES).contains(&request.duration_minutes) {
        errors.insert(
            "duration_minutes".into(),
            json!(format!("Must be between 1 and {MAX_DURATION_MINUTES}")),
        );
    }
    check_common(
        &mut errors,
        request.price,
        request.currency.as_deref(),
        request.minimum_booking_notice,
        request.max_participants,
    );

    finish_validation(errors)
}

fn validate_update(request: &UpdateEventTypeRequest) -> Result<(), ApiError> {
    let mut errors = Map::new();

    if request.name.as_ref().is_some_and(|name| name.trim().is_empty()) {
        errors.insert("name".into(), json!("Must not be empty"));
    }
    if request.slug.as_ref().is_some_and(|slug| !is_valid_slug(slug)) {
        errors.insert(
            "slug".into(),
            json!("Must be lowercase letters, digits and hyphens"),
        );
    }
    if request
        .duration_minutes
        .is_some_and(|duration| !(1..=MAX_DURATION_MINUTES).contains(&duration))
    {
        errors.insert(
            "duration_minutes".into(),
            json!(format!("Must be between 1 and {MAX_DURATION_MINUTES}")),
        );
    }
    check_common(
        &mut errors,
        request.price,
        request.currency.as_deref(),
        request.minimum_booking_notice,
        request.max_participants,
    );

    finish_validation(errors)
}

fn check_common(
    errors: &mut Map<String, JsonValue>,
    price: Option<i64>,
    currency: Option<&str>,
    minimum_booking_notice: Option<i32>,
    max_participants: Option<i32>,
) {
    if price.is_some_and(|price| price < 0) {
        errors.insert("price".into(), json!("Must not be negative"));
    }
    if currency.is_some_and(|currency| {
        currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic())
    }) {
        errors.insert("currency".into(), json!("Must be a three-letter ISO code"));
    }
    if minimum_booking_notice.is_some_and(|notice| notice < 0) {
        errors.insert("minimum_booking_notice".into(), json!("Must not be negative"));
    }
    if max_participants.is_some_and(|max| max < 1) {
        errors.insert("max_participants".into(), json!("Must be at least 1"));
    }
}

fn finish_validation(errors: Map<String, JsonValue>) -> Result<(), ApiError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(validation_error("Invalid event type", JsonValue::Object(errors)))
    }
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn seats_for(max_participants: i32) -> Seats {
    Seats {
        seats_per_time_slot: max_participants,
        show_attendee_info: false,
        show_availability_count: true,
    }
}

/// Folds the scheduling type and discount into event type metadata
fn merged_metadata(
    base: Option<&JsonValue>,
    scheduling_type: Option<SchedulingType>,
    discount: Option<&JsonValue>,
) -> Option<JsonValue> {
    let mut metadata = match base {
        Some(JsonValue::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    if let Some(scheduling_type) = scheduling_type {
        metadata.insert(METADATA_SCHEDULING_TYPE.into(), json!(scheduling_type));
    }
    if let Some(discount) = discount {
        metadata.insert(METADATA_DISCOUNT.into(), discount.clone());
    }

    (!metadata.is_empty()).then_some(JsonValue::Object(metadata))
}

/// Callers can never mark an event type as default; that flag is provisioned
/// by the platform.
fn create_input(request: CreateEventTypeRequest) -> CreateEventTypeInput {
    let price = request.price.filter(|price| *price > 0);
    let mut base = request.metadata;
    if let Some(JsonValue::Object(map)) = base.as_mut() {
        map.remove(METADATA_IS_DEFAULT);
    }

    CreateEventTypeInput {
        metadata: merged_metadata(
            base.as_ref(),
            request.scheduling_type,
            request.discount.as_ref(),
        ),
        title: request.name.trim().to_string(),
        slug: request.slug,
        length_in_minutes: request.duration_minutes,
        description: request.description,
        hidden: request.is_active.map(|active| !active),
        price,
        currency: price.and(request.currency.map(|c| c.to_ascii_lowercase())),
        minimum_booking_notice: request.minimum_booking_notice,
        seats: request.max_participants.map(seats_for),
        locations: request.locations,
    }
}

fn update_input(request: UpdateEventTypeRequest, existing_metadata: Option<&JsonValue>) -> UpdateEventTypeInput {
    let metadata = (request.scheduling_type.is_some() || request.discount.is_some())
        .then(|| {
            merged_metadata(
                existing_metadata,
                request.scheduling_type,
                request.discount.as_ref(),
            )
        })
        .flatten();

    UpdateEventTypeInput {
        title: request.name.map(|name| name.trim().to_string()),
        slug: request.slug,
        length_in_minutes: request.duration_minutes,
        description: request.description,
        hidden: request.is_active.map(|active| !active),
        price: request.price,
        currency: request.currency.map(|c| c.to_ascii_lowercase()),
        minimum_booking_notice: request.minimum_booking_notice,
        seats: request.max_participants.map(seats_for),
        locations: request.locations,
        metadata,
    }
}
