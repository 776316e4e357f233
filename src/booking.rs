//! # Booking and Cancellation
//!
//! Session lifecycle operations that span Cal.com and the local tables.
//! Remote calls always happen first; local rows are only written after Cal.com
//! confirmed the change, and the two local writes share a transaction.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, EntityTrait, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::cal::{BookingAttendee, CalClient, CreateBookingInput};
use crate::models::cal_booking::{self, BookingStatus};
use crate::models::session::{self, SessionStatus};
use crate::models::{CalEventType, cal_event_type};
use crate::repositories::booking::NewBooking;
use crate::repositories::session::NewSession;
use crate::repositories::{BookingRepository, CalendarIntegrationRepository, SessionRepository};
use crate::token_refresh::{TokenRefreshError, TokenRefreshService};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("user '{user_id}' is not a participant of session '{session_id}'")]
    Forbidden { user_id: Uuid, session_id: Uuid },

    #[error("{0}")]
    PolicyViolation(String),

    #[error("session '{session_id}' is {status:?} and cannot be cancelled")]
    InvalidState {
        session_id: Uuid,
        status: SessionStatus,
    },

    #[error("session '{0}' was modified concurrently")]
    Conflict(Uuid),

    #[error("Cal.com request failed: {0}")]
    Provider(#[from] TokenRefreshError),

    #[error("database error: {0:#}")]
    Database(anyhow::Error),
}

impl From<sea_orm::DbErr> for BookingError {
    fn from(err: sea_orm::DbErr) -> Self {
        BookingError::Database(err.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelSessionRequest {
    pub session_id: Uuid,
    /// Local `cal_bookings` row linked to the session
    pub booking_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookSessionRequest {
    /// Local event type to book
    pub event_type_id: Uuid,
    pub start: DateTime<Utc>,
    /// IANA time zone of the attendee
    pub time_zone: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Session and booking rows after a successful operation
#[derive(Debug, Clone)]
pub struct SessionBooking {
    pub session: session::Model,
    pub booking: cal_booking::Model,
}

#[derive(Debug, Clone)]
pub struct BookingService {
    db: Arc<DatabaseConnection>,
    cal: CalClient,
    sessions: SessionRepository,
    bookings: BookingRepository,
    integrations: CalendarIntegrationRepository,
    tokens: TokenRefreshService,
    cancellation_window: Duration,
}

impl BookingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cal: CalClient,
        integrations: CalendarIntegrationRepository,
        tokens: TokenRefreshService,
        cancellation_window_hours: u32,
    ) -> Self {
        Self {
            sessions: SessionRepository::new(Arc::clone(&db)),
            bookings: BookingRepository::new(Arc::clone(&db)),
            db,
            cal,
            integrations,
            tokens,
            cancellation_window: Duration::hours(i64::from(cancellation_window_hours)),
        }
    }

    /// Cancels a scheduled session on Cal.com and locally.
    ///
    /// Authorization, state and cancellation-window checks all run before any
    /// remote call. A local write failure after Cal.com accepted the
    /// cancellation is logged as a divergence and returned as an error.
    #[instrument(
        skip_all,
        fields(user_id = %ctx.user_id, session_id = %request.session_id, booking_id = %request.booking_id)
    )]
    pub async fn cancel_session(
        &self,
        ctx: &RequestContext,
        request: CancelSessionRequest,
    ) -> Result<SessionBooking, BookingError> {
        let result = self.cancel_session_inner(ctx, request).await;
        let outcome = match &result {
            Ok(_) => "cancelled",
            Err(BookingError::Forbidden { .. }) => "forbidden",
            Err(BookingError::PolicyViolation(_)) => "policy_violation",
            Err(BookingError::InvalidState { .. }) | Err(BookingError::Conflict(_)) => {
                "invalid_state"
            }
            Err(BookingError::Provider(_)) => "provider_error",
            Err(_) => "error",
        };
        counter!("session_cancellations_total", "outcome" => outcome).increment(1);
        result
    }

    async fn cancel_session_inner(
        &self,
        ctx: &RequestContext,
        request: CancelSessionRequest,
    ) -> Result<SessionBooking, BookingError> {
        let session_id = request.session_id;
        let session = self
            .sessions
            .get_by_id(session_id)
            .await
            .map_err(BookingError::Database)?
            .ok_or_else(|| BookingError::NotFound(format!("session '{session_id}'")))?;

        if !session.is_participant(ctx.user_id) {
            return Err(BookingError::Forbidden {
                user_id: ctx.user_id,
                session_id,
            });
        }

        if !session.status.can_transition_to(SessionStatus::Cancelled) {
            return Err(BookingError::InvalidState {
                session_id,
                status: session.status,
            });
        }

        let now = Utc::now();
        check_cancellation_window(
            session.start_time.with_timezone(&Utc),
            now,
            self.cancellation_window,
        )?;

        let integration = self
            .integrations
            .find_by_user(session.coach_id)
            .await
            .map_err(BookingError::Database)?
            .ok_or_else(|| {
                BookingError::NotFound(format!(
                    "calendar integration for coach '{}'",
                    session.coach_id
                ))
            })?;

        let booking = self
            .bookings
            .get_by_id(request.booking_id)
            .await
            .map_err(BookingError::Database)?
            .ok_or_else(|| BookingError::NotFound(format!("booking '{}'", request.booking_id)))?;
        if booking.session_id != Some(session_id) {
            return Err(BookingError::Validation(format!(
                "booking '{}' does not belong to session '{}'",
                booking.id, session_id
            )));
        }

        let cal = &self.cal;
        let uid = booking.cal_booking_uid.as_str();
        let reason = request.reason.as_deref();
        self.tokens
            .execute(integration.id, |token| async move {
                cal.cancel_booking(&token, uid, reason).await
            })
            .await?;

        info!(booking_uid = %booking.cal_booking_uid, "Cal.com booking cancelled");

        let txn = self.db.begin().await.map_err(|e| divergence(session_id, e.into()))?;
        let transitioned = SessionRepository::mark_cancelled_with(
            &txn,
            session_id,
            request.reason.as_deref(),
            ctx.user_id,
            now,
        )
        .await
        .map_err(|e| divergence(session_id, e))?;

        if !transitioned {
            txn.rollback().await.map_err(|e| divergence(session_id, e.into()))?;
            warn!(
                booking_uid = %booking.cal_booking_uid,
                "Session left SCHEDULED state during cancellation; remote booking already cancelled"
            );
            return Err(BookingError::Conflict(session_id));
        }

        BookingRepository::set_status_with(&txn, booking.id, BookingStatus::Cancelled)
            .await
            .map_err(|e| divergence(session_id, e))?;
        txn.commit().await.map_err(|e| divergence(session_id, e.into()))?;

        let session = self
            .sessions
            .get_by_id(session_id)
            .await
            .map_err(BookingError::Database)?
            .ok_or_else(|| BookingError::NotFound(format!("session '{session_id}'")))?;
        let booking = self
            .bookings
            .get_by_id(booking.id)
            .await
            .map_err(BookingError::Database)?
            .ok_or_else(|| BookingError::NotFound(format!("booking '{}'", booking.id)))?;

        Ok(SessionBooking { session, booking })
    }

    /// Books a session for the caller with the coach owning `event_type_id`.
    #[instrument(skip_all, fields(user_id = %ctx.user_id, event_type_id = %request.event_type_id))]
    pub async fn book_session(
        &self,
        ctx: &RequestContext,
        request: BookSessionRequest,
    ) -> Result<SessionBooking, BookingError> {
        if request.time_zone.trim().is_empty() {
            return Err(BookingError::Validation("time_zone must not be empty".into()));
        }

        let event_type = CalEventType::find_by_id(request.event_type_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("event type '{}'", request.event_type_id)))?;

        let cal_event_type_id = bookable_remote_id(&event_type)?;
        if event_type.user_id == ctx.user_id {
            return Err(BookingError::Validation(
                "coaches cannot book their own event types".into(),
            ));
        }

        let earliest =
            Utc::now() + Duration::minutes(i64::from(event_type.minimum_booking_notice));
        if request.start < earliest {
            return Err(BookingError::PolicyViolation(format!(
                "sessions of this type must be booked at least {} minutes in advance",
                event_type.minimum_booking_notice
            )));
        }

        let coach_id = event_type.user_id;
        let integration = self
            .integrations
            .find_by_user(coach_id)
            .await
            .map_err(BookingError::Database)?
            .ok_or_else(|| {
                BookingError::NotFound(format!("calendar integration for coach '{coach_id}'"))
            })?;

        let input = CreateBookingInput {
            start: request.start,
            event_type_id: cal_event_type_id,
            attendee: BookingAttendee {
                name: ctx.name.clone().unwrap_or_else(|| ctx.email.clone()),
                email: ctx.email.clone(),
                time_zone: request.time_zone.clone(),
            },
            length_in_minutes: None,
            metadata: Some(json!({
                "menteeId": ctx.user_id.to_string(),
                "notes": request.notes,
            })),
        };

        let cal = &self.cal;
        let input = &input;
        let remote = self
            .tokens
            .execute(integration.id, |token| async move {
                cal.create_booking(&token, input).await
            })
            .await?;

        info!(booking_uid = %remote.uid, "Cal.com booking created");

        let persist = async {
            let txn = self.db.begin().await?;
            let session = SessionRepository::insert_with(
                &txn,
                NewSession {
                    coach_id,
                    mentee_id: ctx.user_id,
                    cal_event_type_id: Some(event_type.id),
                    start_time: remote.start,
                    end_time: remote.end,
                },
            )
            .await?;
            let booking = BookingRepository::insert_with(
                &txn,
                NewBooking {
                    session_id: Some(session.id),
                    coach_id,
                    cal_booking_uid: remote.uid.clone(),
                    cal_booking_id: Some(remote.id),
                    status: BookingStatus::from_remote(&remote.status),
                    start_time: remote.start,
                    end_time: remote.end,
                    attendee_email: ctx.email.clone(),
                    attendee_name: ctx.name.clone(),
                },
            )
            .await?;
            txn.commit().await?;
            anyhow::Ok(SessionBooking { session, booking })
        };

        persist.await.map_err(|err| {
            let message = format!("{err:#}");
            error!(
                booking_uid = %remote.uid,
                error = %message,
                "Cal.com booking created but local rows were not written"
            );
            BookingError::Database(err)
        })
    }
}

/// Rejects cancellations closer to the start than `window`
pub fn check_cancellation_window(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<(), BookingError> {
    if start - now < window {
        return Err(BookingError::PolicyViolation(format!(
            "sessions cannot be cancelled within {} hours of the start time",
            window.num_hours()
        )));
    }
    Ok(())
}

fn bookable_remote_id(event_type: &cal_event_type::Model) -> Result<i64, BookingError> {
    if !event_type.is_active {
        return Err(BookingError::Validation(format!(
            "event type '{}' is not active",
            event_type.id
        )));
    }
    event_type.cal_event_type_id.ok_or_else(|| {
        BookingError::Validation(format!(
            "event type '{}' is not published to Cal.com",
            event_type.id
        ))
    })
}

fn divergence(session_id: Uuid, err: anyhow::Error) -> BookingError {
    let message = format!("{err:#}");
    error!(
        %session_id,
        error = %message,
        "Cal.com booking cancelled but local session update failed"
    );
    BookingError::Database(err)
}
