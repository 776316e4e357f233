//! Test utilities shared by the integration suites.
//!
//! Provides an in-memory SQLite database with migrations applied, an
//! [`AppState`] pointed at a wiremock Cal.com server, and fixture helpers.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use coachcal::{
    cal::{CalTokens, RemoteEventType},
    config::{AppConfig, CalConfig},
    models::{CalEventType, cal_booking, cal_event_type, calendar_integration, session, user},
    repositories::{
        BookingRepository, SessionRepository, UserRepository,
        booking::NewBooking,
        calendar_integration::ManagedIdentity,
        event_type::EventTypeOwner,
        session::NewSession,
    },
    server::AppState,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const CAL_CLIENT_ID: &str = "test-client";
pub const CAL_SECRET_KEY: &str = "test-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool holds a single connection so every query sees the same database.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

pub fn test_config(cal_api_base: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        crypto_key: Some(vec![42u8; 32]),
        cal: CalConfig {
            api_base: cal_api_base.to_string(),
            client_id: Some(CAL_CLIENT_ID.to_string()),
            secret_key: Some(CAL_SECRET_KEY.to_string()),
            http_timeout_seconds: 5,
        },
        ..Default::default()
    }
}

/// Builds the application state against a fresh database
pub async fn test_state(cal_api_base: &str) -> Result<AppState> {
    test_state_with(test_config(cal_api_base)).await
}

pub async fn test_state_with(config: AppConfig) -> Result<AppState> {
    let db = setup_test_db().await?;
    Ok(AppState::new(Arc::new(config), db)?)
}

pub async fn seed_user(state: &AppState, email: &str, role: user::UserRole) -> Result<user::Model> {
    UserRepository::new(Arc::clone(&state.db))
        .create(email, Some("Test"), Some("User"), role)
        .await
}

pub fn tokens(access_token: &str, expires_at: Option<DateTime<Utc>>) -> CalTokens {
    CalTokens {
        access_token: access_token.to_string(),
        refresh_token: format!("{access_token}-refresh"),
        access_token_expires_at: expires_at,
        refresh_token_expires_at: Some(Utc::now() + Duration::days(30)),
    }
}

/// Stores an integration whose access token is valid for another hour
pub async fn seed_integration(
    state: &AppState,
    user_id: Uuid,
    access_token: &str,
) -> Result<calendar_integration::Model> {
    seed_integration_expiring(state, user_id, access_token, Utc::now() + Duration::hours(1)).await
}

pub async fn seed_integration_expiring(
    state: &AppState,
    user_id: Uuid,
    access_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<calendar_integration::Model> {
    state
        .integrations
        .upsert_for_user(
            user_id,
            Some(ManagedIdentity {
                managed_user_id: 9001,
                username: Some("coach-managed".to_string()),
            }),
            &tokens(access_token, Some(expires_at)),
        )
        .await
}

pub fn remote_event_type(id: i64, title: &str) -> RemoteEventType {
    RemoteEventType {
        id,
        title: title.to_string(),
        slug: title.to_lowercase().replace(' ', "-"),
        description: None,
        length_in_minutes: 30,
        hidden: false,
        scheduling_type: None,
        price: None,
        currency: None,
        minimum_booking_notice: None,
        before_event_buffer: None,
        after_event_buffer: None,
        position: Some(0),
        seats: None,
        locations: None,
        metadata: None,
    }
}

pub fn default_remote_event_type(id: i64, title: &str) -> RemoteEventType {
    RemoteEventType {
        metadata: Some(json!({ "isDefault": true })),
        ..remote_event_type(id, title)
    }
}

/// Inserts a local event type mirroring `remote`
pub async fn seed_event_type(
    state: &AppState,
    integration: &calendar_integration::Model,
    remote: &RemoteEventType,
) -> Result<cal_event_type::Model> {
    state
        .event_types
        .create(
            EventTypeOwner {
                user_id: integration.user_id,
                calendar_integration_id: integration.id,
            },
            Some(remote.id),
            coachcal::event_type_sync::plan::remote_is_default(remote),
            coachcal::event_type_sync::plan::fields_from_remote(remote, None),
        )
        .await
}

/// Looks up a local event type by its Cal.com id
pub async fn event_type_by_remote_id(
    state: &AppState,
    cal_event_type_id: i64,
) -> Result<Option<cal_event_type::Model>> {
    Ok(CalEventType::find()
        .filter(cal_event_type::Column::CalEventTypeId.eq(cal_event_type_id))
        .one(&*state.db)
        .await?)
}

/// Inserts a local-only event type without a Cal.com id
pub async fn seed_local_only_event_type(
    state: &AppState,
    integration: &calendar_integration::Model,
    title: &str,
) -> Result<cal_event_type::Model> {
    state
        .event_types
        .create(
            EventTypeOwner {
                user_id: integration.user_id,
                calendar_integration_id: integration.id,
            },
            None,
            false,
            coachcal::event_type_sync::plan::fields_from_remote(
                &remote_event_type(0, title),
                None,
            ),
        )
        .await
}

/// Inserts a scheduled session starting at `start` and its linked booking
pub async fn seed_session(
    state: &AppState,
    coach_id: Uuid,
    mentee_id: Uuid,
    start: DateTime<Utc>,
    booking_uid: &str,
) -> Result<(session::Model, cal_booking::Model)> {
    let session = SessionRepository::new(Arc::clone(&state.db))
        .create(NewSession {
            coach_id,
            mentee_id,
            cal_event_type_id: None,
            start_time: start,
            end_time: start + Duration::minutes(30),
        })
        .await?;

    let booking = BookingRepository::new(Arc::clone(&state.db))
        .create(NewBooking {
            session_id: Some(session.id),
            coach_id,
            cal_booking_uid: booking_uid.to_string(),
            cal_booking_id: Some(555),
            status: cal_booking::BookingStatus::Accepted,
            start_time: start,
            end_time: start + Duration::minutes(30),
            attendee_email: "mentee@example.com".to_string(),
            attendee_name: None,
        })
        .await?;

    Ok((session, booking))
}

/// Wraps `data` in the Cal.com success envelope
pub fn envelope(data: serde_json::Value) -> serde_json::Value {
    json!({ "status": "success", "data": data })
}
