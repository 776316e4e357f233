//! Session cancellation across Cal.com and the local tables.

use anyhow::Result;
use chrono::{Duration, Utc};
use coachcal::{
    auth::RequestContext,
    booking::{BookingError, CancelSessionRequest},
    models::{
        cal_booking::BookingStatus,
        session::{self, SessionStatus},
        user::UserRole,
    },
    repositories::{BookingRepository, SessionRepository},
};
use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};
use serde_json::json;
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{envelope, seed_integration, seed_session, seed_user, test_state};

struct Fixture {
    state: coachcal::server::AppState,
    coach: coachcal::models::user::Model,
    mentee: coachcal::models::user::Model,
    session: session::Model,
    booking: coachcal::models::cal_booking::Model,
}

async fn fixture(server: &MockServer, starts_in: Duration) -> Result<Fixture> {
    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let mentee = seed_user(&state, "mentee@example.com", UserRole::Mentee).await?;
    seed_integration(&state, coach.id, "coach-access").await?;
    let (session, booking) =
        seed_session(&state, coach.id, mentee.id, Utc::now() + starts_in, "bk-uid-1").await?;
    Ok(Fixture {
        state,
        coach,
        mentee,
        session,
        booking,
    })
}

fn cancel(fixture: &Fixture, reason: Option<&str>) -> CancelSessionRequest {
    CancelSessionRequest {
        session_id: fixture.session.id,
        booking_id: fixture.booking.id,
        reason: reason.map(str::to_string),
    }
}

async fn reload(fixture: &Fixture) -> Result<(session::Model, coachcal::models::cal_booking::Model)> {
    let session = SessionRepository::new(Arc::clone(&fixture.state.db))
        .get_by_id(fixture.session.id)
        .await?
        .expect("session");
    let booking = BookingRepository::new(Arc::clone(&fixture.state.db))
        .get_by_id(fixture.booking.id)
        .await?
        .expect("booking");
    Ok((session, booking))
}

#[tokio::test]
async fn mentee_cancels_session_remote_first() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bookings/bk-uid-1/cancel"))
        .and(header("authorization", "Bearer coach-access"))
        .and(header("cal-api-version", "2024-08-13"))
        .and(body_json(json!({ "cancellationReason": "Conflict at work" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = fixture(&server, Duration::hours(48)).await?;
    let ctx = RequestContext::from_user(&fixture.mentee);

    let result = fixture
        .state
        .bookings
        .cancel_session(&ctx, cancel(&fixture, Some("Conflict at work")))
        .await?;

    assert_eq!(result.session.status, SessionStatus::Cancelled);
    assert_eq!(result.session.cancelled_by, Some(fixture.mentee.id));
    assert_eq!(
        result.session.cancellation_reason.as_deref(),
        Some("Conflict at work")
    );
    assert!(result.session.cancelled_at.is_some());
    assert_eq!(result.booking.status, BookingStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn coach_may_cancel_too() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bookings/bk-uid-1/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(&server)
        .await;

    let fixture = fixture(&server, Duration::hours(72)).await?;
    let ctx = RequestContext::from_user(&fixture.coach);

    let result = fixture
        .state
        .bookings
        .cancel_session(&ctx, cancel(&fixture, None))
        .await?;
    assert_eq!(result.session.cancelled_by, Some(fixture.coach.id));
    Ok(())
}

#[tokio::test]
async fn outsiders_are_forbidden_without_remote_call() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(0)
        .mount(&server)
        .await;

    let fixture = fixture(&server, Duration::hours(48)).await?;
    let stranger = seed_user(&fixture.state, "stranger@example.com", UserRole::Mentee).await?;
    let ctx = RequestContext::from_user(&stranger);

    let err = fixture
        .state
        .bookings
        .cancel_session(&ctx, cancel(&fixture, None))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Forbidden { .. }));

    let (session, _) = reload(&fixture).await?;
    assert_eq!(session.status, SessionStatus::Scheduled);
    Ok(())
}

#[tokio::test]
async fn cancellation_inside_window_is_rejected() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(0)
        .mount(&server)
        .await;

    let fixture = fixture(&server, Duration::hours(3)).await?;
    let ctx = RequestContext::from_user(&fixture.mentee);

    let err = fixture
        .state
        .bookings
        .cancel_session(&ctx, cancel(&fixture, None))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::PolicyViolation(_)));

    let api_error: coachcal::error::ApiError = err.into();
    assert_eq!(api_error.status.as_u16(), 422);

    let (session, booking) = reload(&fixture).await?;
    assert_eq!(session.status, SessionStatus::Scheduled);
    assert_eq!(booking.status, BookingStatus::Accepted);
    Ok(())
}

#[tokio::test]
async fn only_scheduled_sessions_can_be_cancelled() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(0)
        .mount(&server)
        .await;

    let fixture = fixture(&server, Duration::hours(48)).await?;
    let mut completed = fixture.session.clone().into_active_model();
    completed.status = Set(SessionStatus::Completed);
    completed.update(&*fixture.state.db).await?;

    let ctx = RequestContext::from_user(&fixture.mentee);
    let err = fixture
        .state
        .bookings
        .cancel_session(&ctx, cancel(&fixture, None))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::InvalidState {
            status: SessionStatus::Completed,
            ..
        }
    ));
    let api_error: coachcal::error::ApiError = err.into();
    assert_eq!(api_error.status.as_u16(), 409);
    Ok(())
}

#[tokio::test]
async fn booking_must_belong_to_the_session() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(0)
        .mount(&server)
        .await;

    let fixture = fixture(&server, Duration::hours(48)).await?;
    let (_, unrelated) = seed_session(
        &fixture.state,
        fixture.coach.id,
        fixture.mentee.id,
        Utc::now() + Duration::hours(96),
        "bk-uid-2",
    )
    .await?;

    let ctx = RequestContext::from_user(&fixture.mentee);
    let err = fixture
        .state
        .bookings
        .cancel_session(
            &ctx,
            CancelSessionRequest {
                session_id: fixture.session.id,
                booking_id: unrelated.id,
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn remote_failure_leaves_local_rows_untouched() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bookings/bk-uid-1/cancel"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = fixture(&server, Duration::hours(48)).await?;
    let ctx = RequestContext::from_user(&fixture.mentee);

    let err = fixture
        .state
        .bookings
        .cancel_session(&ctx, cancel(&fixture, Some("sick")))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Provider(_)));

    let (session, booking) = reload(&fixture).await?;
    assert_eq!(session.status, SessionStatus::Scheduled);
    assert!(session.cancellation_reason.is_none());
    assert_eq!(booking.status, BookingStatus::Accepted);
    Ok(())
}

#[tokio::test]
async fn second_cancellation_is_rejected() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bookings/bk-uid-1/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = fixture(&server, Duration::hours(48)).await?;
    let ctx = RequestContext::from_user(&fixture.mentee);

    fixture
        .state
        .bookings
        .cancel_session(&ctx, cancel(&fixture, None))
        .await?;
    let err = fixture
        .state
        .bookings
        .cancel_session(&ctx, cancel(&fixture, None))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::InvalidState {
            status: SessionStatus::Cancelled,
            ..
        }
    ));
    Ok(())
}
