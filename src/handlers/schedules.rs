//! # Schedule Handlers
//!
//! Availability schedules live only on Cal.com; these routes pass requests
//! through with the caller's managed-user credentials.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde_json::{Map, Value as JsonValue, json};

use crate::auth::{RequestContext, UserHeader};
use crate::cal::{Availability, CreateScheduleInput, Schedule, UpdateScheduleInput};
use crate::error::{ApiError, validation_error};
use crate::handlers::{caller_integration, remote_lookup_error, require_any_role};
use crate::models::user::UserRole;
use crate::server::AppState;

const SCHEDULE_EDITORS: &[UserRole] = &[UserRole::Coach, UserRole::Admin];
const WEEKDAYS: &[&str] = &[
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Lists the caller's schedules
#[utoipa::path(
    get,
    path = "/schedules",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Caller's schedules", body = [Schedule]),
        (status = 404, description = "Caller has no calendar integration", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "schedules"
)]
pub async fn list_schedules(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<Schedule>>, ApiError> {
    let integration = caller_integration(&state, &ctx).await?;
    let cal = &state.cal;
    let schedules = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_schedules(&token).await
        })
        .await?;
    Ok(Json(schedules))
}

#[utoipa::path(
    post,
    path = "/schedules",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = CreateScheduleInput,
    responses(
        (status = 201, description = "Schedule created", body = Schedule),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 403, description = "Caller is not a coach", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "schedules"
)]
pub async fn create_schedule(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateScheduleInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let Json(input) = payload?;
    require_any_role(&ctx, SCHEDULE_EDITORS)?;

    let mut errors = Map::new();
    if input.name.trim().is_empty() {
        errors.insert("name".into(), json!("Must not be empty"));
    }
    if input.time_zone.trim().is_empty() {
        errors.insert("time_zone".into(), json!("Must not be empty"));
    }
    check_availability(&mut errors, &input.availability);
    if !errors.is_empty() {
        return Err(validation_error("Invalid schedule", JsonValue::Object(errors)));
    }

    let integration = caller_integration(&state, &ctx).await?;
    let cal = &state.cal;
    let input = &input;
    let schedule = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.create_schedule(&token, input).await
        })
        .await?;

    tracing::info!(schedule_id = schedule.id, "Schedule created");
    Ok((StatusCode::CREATED, Json(schedule)))
}

#[utoipa::path(
    patch,
    path = "/schedules/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Cal.com schedule id"),
        UserHeader
    ),
    request_body = UpdateScheduleInput,
    responses(
        (status = 200, description = "Schedule updated", body = Schedule),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Schedule not found", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "schedules"
)]
pub async fn update_schedule(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
    payload: Result<Json<UpdateScheduleInput>, JsonRejection>,
) -> Result<Json<Schedule>, ApiError> {
    let Json(input) = payload?;
    require_any_role(&ctx, SCHEDULE_EDITORS)?;

    let mut errors = Map::new();
    if input.name.as_ref().is_some_and(|name| name.trim().is_empty()) {
        errors.insert("name".into(), json!("Must not be empty"));
    }
    if let Some(availability) = &input.availability {
        check_availability(&mut errors, availability);
    }
    if !errors.is_empty() {
        return Err(validation_error("Invalid schedule", JsonValue::Object(errors)));
    }

    let integration = caller_integration(&state, &ctx).await?;
    let cal = &state.cal;
    let input = &input;
    let schedule = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.update_schedule(&token, id, input).await
        })
        .await
        .map_err(|err| remote_lookup_error(err, "Schedule"))?;

    Ok(Json(schedule))
}

#[utoipa::path(
    delete,
    path = "/schedules/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Cal.com schedule id"),
        UserHeader
    ),
    responses(
        (status = 204, description = "Schedule deleted"),
        (status = 404, description = "Schedule not found", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "schedules"
)]
pub async fn delete_schedule(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require_any_role(&ctx, SCHEDULE_EDITORS)?;
    let integration = caller_integration(&state, &ctx).await?;

    let cal = &state.cal;
    state
        .tokens
        .execute(integration.id, |token| async move {
            cal.delete_schedule(&token, id).await
        })
        .await
        .map_err(|err| remote_lookup_error(err, "Schedule"))?;

    tracing::info!(schedule_id = id, "Schedule deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn check_availability(errors: &mut Map<String, JsonValue>, availability: &[Availability]) {
    for (index, slot) in availability.iter().enumerate() {
        if slot.days.is_empty() || slot.days.iter().any(|day| !WEEKDAYS.contains(&day.as_str())) {
            errors.insert(
                format!("availability[{index}].days"),
                json!("Must list capitalised weekday names"),
            );
        }
        match (parse_hhmm(&slot.start_time), parse_hhmm(&slot.end_time)) {
            (Some(start), Some(end)) if start < end => {}
            (Some(_), Some(_)) => {
                errors.insert(
                    format!("availability[{index}]"),
                    json!("start_time must be before end_time"),
                );
            }
            _ => {
                errors.insert(
                    format!("availability[{index}]"),
                    json!("Times must use HH:MM"),
                );
            }
        }
    }
}

/// Minutes since midnight of an `HH:MM` time
fn parse_hhmm(value: &str) -> Option<u32> {
    let (hours, minutes) = value.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}
