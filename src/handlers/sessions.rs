//! # Session Handlers
//!
//! Booking and cancellation of coaching sessions. The workflow itself lives in
//! [`crate::booking`]; these handlers only translate HTTP to service calls.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{RequestContext, UserHeader};
use crate::booking::{BookSessionRequest, CancelSessionRequest, SessionBooking};
use crate::error::ApiError;
use crate::models::cal_booking::{self, BookingStatus};
use crate::models::session::{self, SessionStatus};
use crate::server::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub coach_id: Uuid,
    #[schema(value_type = String)]
    pub mentee_id: Uuid,
    #[schema(value_type = Option<String>)]
    pub cal_event_type_id: Option<Uuid>,
    pub status: SessionStatus,
    pub start_time: String,
    pub end_time: String,
    pub cancellation_reason: Option<String>,
    #[schema(value_type = Option<String>)]
    pub cancelled_by: Option<Uuid>,
    pub cancelled_at: Option<String>,
}

impl From<session::Model> for SessionResponse {
    fn from(model: session::Model) -> Self {
        Self {
            id: model.id,
            coach_id: model.coach_id,
            mentee_id: model.mentee_id,
            cal_event_type_id: model.cal_event_type_id,
            status: model.status,
            start_time: model.start_time.to_rfc3339(),
            end_time: model.end_time.to_rfc3339(),
            cancellation_reason: model.cancellation_reason,
            cancelled_by: model.cancelled_by,
            cancelled_at: model.cancelled_at.map(|at| at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingResponse {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub cal_booking_uid: String,
    pub cal_booking_id: Option<i64>,
    pub status: BookingStatus,
    pub start_time: String,
    pub end_time: String,
    pub attendee_email: String,
    pub attendee_name: Option<String>,
}

impl From<cal_booking::Model> for BookingResponse {
    fn from(model: cal_booking::Model) -> Self {
        Self {
            id: model.id,
            cal_booking_uid: model.cal_booking_uid,
            cal_booking_id: model.cal_booking_id,
            status: model.status,
            start_time: model.start_time.to_rfc3339(),
            end_time: model.end_time.to_rfc3339(),
            attendee_email: model.attendee_email,
            attendee_name: model.attendee_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionBookingResponse {
    pub session: SessionResponse,
    pub booking: BookingResponse,
}

impl From<SessionBooking> for SessionBookingResponse {
    fn from(value: SessionBooking) -> Self {
        Self {
            session: value.session.into(),
            booking: value.booking.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelSessionBody {
    /// Local booking row linked to the session
    #[schema(value_type = String)]
    pub booking_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Books a session with the coach owning the event type; the caller is the mentee
#[utoipa::path(
    post,
    path = "/bookings",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = BookSessionRequest,
    responses(
        (status = 201, description = "Session booked", body = SessionBookingResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Event type or coach integration not found", body = ApiError),
        (status = 422, description = "Inside the minimum booking notice", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn book_session(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<BookSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionBookingResponse>), ApiError> {
    let Json(request) = payload?;
    let booked = state.bookings.book_session(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(booked.into())))
}

/// Cancels a scheduled session on Cal.com and locally
#[utoipa::path(
    post,
    path = "/sessions/{id}/cancel",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Session id"),
        UserHeader
    ),
    request_body = CancelSessionBody,
    responses(
        (status = 200, description = "Session cancelled", body = SessionBookingResponse),
        (status = 400, description = "Booking does not belong to the session", body = ApiError),
        (status = 403, description = "Caller is not a participant", body = ApiError),
        (status = 404, description = "Session or booking not found", body = ApiError),
        (status = 409, description = "Session is not scheduled", body = ApiError),
        (status = 422, description = "Inside the cancellation window", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn cancel_session(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    payload: Result<Json<CancelSessionBody>, JsonRejection>,
) -> Result<Json<SessionBookingResponse>, ApiError> {
    let Json(body) = payload?;
    let cancelled = state
        .bookings
        .cancel_session(
            &ctx,
            CancelSessionRequest {
                session_id: id,
                booking_id: body.booking_id,
                reason: body.reason.filter(|reason| !reason.trim().is_empty()),
            },
        )
        .await?;
    Ok(Json(cancelled.into()))
}
