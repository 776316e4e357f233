//! End-to-end checks of the HTTP surface: authentication, routing and the
//! error envelope.

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use coachcal::{models::user::UserRole, server::create_app};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{
    OPERATOR_TOKEN, default_remote_event_type, envelope, event_type_by_remote_id, remote_event_type, seed_event_type,
    seed_integration, seed_session, seed_user, test_state,
};

fn authed(method: &str, uri: &str, user_id: Uuid) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"))
        .header("X-User-Id", user_id.to_string())
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

#[tokio::test]
async fn healthz_is_public() -> Result<()> {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server.uri()).await?);

    let (status, body) = send(
        &app,
        Request::builder().uri("/healthz").body(Body::empty())?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_operator_token() -> Result<()> {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server.uri()).await?);

    let (status, body) = send(
        &app,
        Request::builder().uri("/event-types").body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(
        &app,
        Request::builder()
            .uri("/event-types")
            .header(header::AUTHORIZATION, "Bearer wrong-token")
            .header("X-User-Id", Uuid::now_v7().to_string())
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn user_header_is_required_and_must_exist() -> Result<()> {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server.uri()).await?);

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/event-types")
            .header(header::AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, _) = send(
        &app,
        authed("GET", "/event-types", Uuid::now_v7()).body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn mentees_cannot_create_event_types() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let state = test_state(&server.uri()).await?;
    let mentee = seed_user(&state, "mentee@example.com", UserRole::Mentee).await?;
    let app = create_app(state);

    let (status, body) = send(
        &app,
        authed("POST", "/event-types", mentee.id)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "name": "Intro", "slug": "intro", "duration_minutes": 30 }).to_string(),
            ))?,
    )
    .await?;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
    Ok(())
}

#[tokio::test]
async fn schedules_need_a_calendar_integration() -> Result<()> {
    let server = MockServer::start().await;
    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let app = create_app(state);

    let (status, body) = send(&app, authed("GET", "/schedules", coach.id).body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn default_event_types_cannot_be_deleted() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration = seed_integration(&state, coach.id, "access").await?;
    let default = seed_event_type(&state, &integration, &default_remote_event_type(11, "Intro")).await?;
    let app = create_app(state.clone());

    let (status, body) = send(
        &app,
        authed("DELETE", &format!("/event-types/{}", default.id), coach.id).body(Body::empty())?,
    )
    .await?;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
    assert!(event_type_by_remote_id(&state, 11).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn default_event_types_keep_their_core_fields() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration = seed_integration(&state, coach.id, "access").await?;
    let default = seed_event_type(&state, &integration, &default_remote_event_type(12, "Intro")).await?;
    let app = create_app(state);

    let (status, body) = send(
        &app,
        authed("PATCH", &format!("/event-types/{}", default.id), coach.id)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "name": "Renamed" }).to_string()))?,
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert!(body["details"]["name"].is_string());
    Ok(())
}

#[tokio::test]
async fn event_types_of_other_users_are_not_found() -> Result<()> {
    let server = MockServer::start().await;
    let state = test_state(&server.uri()).await?;
    let owner = seed_user(&state, "owner@example.com", UserRole::Coach).await?;
    let other = seed_user(&state, "other@example.com", UserRole::Coach).await?;
    let integration = seed_integration(&state, owner.id, "access").await?;
    let record = seed_event_type(&state, &integration, &remote_event_type(13, "Private")).await?;
    seed_integration(&state, other.id, "other-access").await?;
    let app = create_app(state);

    let (status, _) = send(
        &app,
        authed("DELETE", &format!("/event-types/{}", record.id), other.id).body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn sync_endpoint_returns_report() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/event-types"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            { "id": 21, "title": "Remote", "slug": "remote", "lengthInMinutes": 30 }
        ]))))
        .expect(1)
        .mount(&server)
        .await;
    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    seed_integration(&state, coach.id, "access").await?;
    let app = create_app(state);

    let (status, body) = send(
        &app,
        authed("POST", "/event-types/sync?delete_missing=true", coach.id).body(Body::empty())?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["created"], 1);

    let (status, body) = send(&app, authed("GET", "/event-types", coach.id).body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event_types"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn cancel_route_cancels_session() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bookings/bk-http/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .expect(1)
        .mount(&server)
        .await;
    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let mentee = seed_user(&state, "mentee@example.com", UserRole::Mentee).await?;
    seed_integration(&state, coach.id, "access").await?;
    let (session, booking) = seed_session(
        &state,
        coach.id,
        mentee.id,
        Utc::now() + Duration::days(3),
        "bk-http",
    )
    .await?;
    let app = create_app(state);

    let (status, body) = send(
        &app,
        authed("POST", &format!("/sessions/{}/cancel", session.id), mentee.id)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "booking_id": booking.id, "reason": "  " }).to_string(),
            ))?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "CANCELLED");
    assert_eq!(body["session"]["cancellation_reason"], Value::Null);
    assert_eq!(body["booking"]["status"], "CANCELLED");
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server.uri()).await?);

    let (status, body) = send(
        &app,
        Request::builder().uri("/openapi.json").body(Body::empty())?,
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/sessions/{id}/cancel"].is_object());
    assert!(body["paths"]["/event-types/sync"].is_object());
    Ok(())
}
