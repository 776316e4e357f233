//! Access token refresh around Cal.com calls.

use anyhow::Result;
use chrono::{Duration, Utc};
use coachcal::{cal::CalError, models::user::UserRole, token_refresh::TokenRefreshError};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{
    CAL_CLIENT_ID, CAL_SECRET_KEY, envelope, seed_integration, seed_integration_expiring,
    seed_user, test_state,
};

fn issued_tokens(access_token: &str) -> serde_json::Value {
    envelope(json!({
        "accessToken": access_token,
        "refreshToken": format!("{access_token}-refresh"),
        "accessTokenExpiresAt": (Utc::now() + Duration::hours(1)).timestamp_millis(),
        "refreshTokenExpiresAt": (Utc::now() + Duration::days(30)).to_rfc3339()
    }))
}

async fn mount_list(server: &MockServer, token: &str, response: ResponseTemplate, calls: u64) {
    Mock::given(method("GET"))
        .and(path("/event-types"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

async fn mount_refresh(server: &MockServer, refresh_token: &str, response: ResponseTemplate, calls: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/oauth/{CAL_CLIENT_ID}/refresh")))
        .and(header("x-cal-secret-key", CAL_SECRET_KEY))
        .and(body_json(json!({ "refreshToken": refresh_token })))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

fn expired() -> ResponseTemplate {
    ResponseTemplate::new(498).set_body_json(json!({ "status": "error" }))
}

fn empty_list() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(envelope(json!([])))
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_retried() -> Result<()> {
    let server = MockServer::start().await;
    mount_list(&server, "old", expired(), 1).await;
    mount_list(&server, "new", empty_list(), 1).await;
    mount_refresh(
        &server,
        "old-refresh",
        ResponseTemplate::new(200).set_body_json(issued_tokens("new")),
        1,
    )
    .await;

    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration = seed_integration(&state, coach.id, "old").await?;

    let cal = &state.cal;
    let remote = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_event_types(&token).await
        })
        .await?;
    assert!(remote.is_empty());

    let stored = state
        .integrations
        .get_by_id(integration.id)
        .await?
        .expect("integration");
    let tokens = state.integrations.decrypt_tokens(&stored)?;
    assert_eq!(tokens.access_token.as_deref(), Some("new"));
    assert_eq!(tokens.refresh_token.as_deref(), Some("new-refresh"));
    Ok(())
}

#[tokio::test]
async fn second_expiry_is_returned_without_another_refresh() -> Result<()> {
    let server = MockServer::start().await;
    mount_list(&server, "old", expired(), 1).await;
    mount_list(&server, "new", expired(), 1).await;
    mount_refresh(
        &server,
        "old-refresh",
        ResponseTemplate::new(200).set_body_json(issued_tokens("new")),
        1,
    )
    .await;

    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration = seed_integration(&state, coach.id, "old").await?;

    let cal = &state.cal;
    let err = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_event_types(&token).await
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TokenRefreshError::Cal(CalError::AccessTokenExpired)
    ));
    Ok(())
}

#[tokio::test]
async fn other_failures_are_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    mount_list(
        &server,
        "old",
        ResponseTemplate::new(503).set_body_string("maintenance"),
        1,
    )
    .await;
    mount_refresh(&server, "old-refresh", ResponseTemplate::new(200), 0).await;

    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration = seed_integration(&state, coach.id, "old").await?;

    let cal = &state.cal;
    let err = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_event_types(&token).await
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TokenRefreshError::Cal(CalError::Http { status: 503, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn token_close_to_expiry_is_refreshed_before_the_call() -> Result<()> {
    let server = MockServer::start().await;
    mount_list(&server, "old", empty_list(), 0).await;
    mount_list(&server, "new", empty_list(), 1).await;
    mount_refresh(
        &server,
        "old-refresh",
        ResponseTemplate::new(200).set_body_json(issued_tokens("new")),
        1,
    )
    .await;

    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration =
        seed_integration_expiring(&state, coach.id, "old", Utc::now() + Duration::seconds(60))
            .await?;

    let cal = &state.cal;
    state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_event_types(&token).await
        })
        .await?;
    Ok(())
}

#[tokio::test]
async fn failed_proactive_refresh_falls_back_to_current_token() -> Result<()> {
    let server = MockServer::start().await;
    mount_list(&server, "old", empty_list(), 1).await;
    mount_refresh(
        &server,
        "old-refresh",
        ResponseTemplate::new(502).set_body_string("bad gateway"),
        1,
    )
    .await;

    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration =
        seed_integration_expiring(&state, coach.id, "old", Utc::now() + Duration::seconds(30))
            .await?;

    let cal = &state.cal;
    let remote = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_event_types(&token).await
        })
        .await?;
    assert!(remote.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_proactive_refresh_still_allows_retry_on_expiry() -> Result<()> {
    let server = MockServer::start().await;
    mount_list(&server, "old", expired(), 1).await;
    mount_list(&server, "new", empty_list(), 1).await;
    // First refresh attempt fails, the next one succeeds
    Mock::given(method("POST"))
        .and(path(format!("/oauth/{CAL_CLIENT_ID}/refresh")))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        "old-refresh",
        ResponseTemplate::new(200).set_body_json(issued_tokens("new")),
        1,
    )
    .await;

    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration =
        seed_integration_expiring(&state, coach.id, "old", Utc::now() + Duration::seconds(30))
            .await?;

    let cal = &state.cal;
    let remote = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_event_types(&token).await
        })
        .await?;
    assert!(remote.is_empty());
    Ok(())
}

#[tokio::test]
async fn expiry_after_proactive_refresh_is_retried_once() -> Result<()> {
    let server = MockServer::start().await;
    mount_list(&server, "new", expired(), 1).await;
    mount_list(&server, "newer", empty_list(), 1).await;
    mount_refresh(
        &server,
        "old-refresh",
        ResponseTemplate::new(200).set_body_json(issued_tokens("new")),
        1,
    )
    .await;
    mount_refresh(
        &server,
        "new-refresh",
        ResponseTemplate::new(200).set_body_json(issued_tokens("newer")),
        1,
    )
    .await;

    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration =
        seed_integration_expiring(&state, coach.id, "old", Utc::now() + Duration::seconds(30))
            .await?;

    let cal = &state.cal;
    state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_event_types(&token).await
        })
        .await?;

    let stored = state
        .integrations
        .get_by_id(integration.id)
        .await?
        .expect("integration");
    assert_eq!(
        state
            .integrations
            .decrypt_tokens(&stored)?
            .access_token
            .as_deref(),
        Some("newer")
    );
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_token_falls_back_to_forced_refresh() -> Result<()> {
    let server = MockServer::start().await;
    mount_list(&server, "old", expired(), 1).await;
    mount_list(&server, "forced", empty_list(), 1).await;
    mount_refresh(
        &server,
        "old-refresh",
        ResponseTemplate::new(401).set_body_string("invalid refresh token"),
        1,
    )
    .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/oauth-clients/{CAL_CLIENT_ID}/users/9001/force-refresh"
        )))
        .and(header("x-cal-client-id", CAL_CLIENT_ID))
        .and(header("x-cal-secret-key", CAL_SECRET_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(issued_tokens("forced")))
        .expect(1)
        .mount(&server)
        .await;

    let state = test_state(&server.uri()).await?;
    let coach = seed_user(&state, "coach@example.com", UserRole::Coach).await?;
    let integration = seed_integration(&state, coach.id, "old").await?;

    let cal = &state.cal;
    state
        .tokens
        .execute(integration.id, |token| async move {
            cal.list_event_types(&token).await
        })
        .await?;

    let stored = state
        .integrations
        .get_by_id(integration.id)
        .await?
        .expect("integration");
    assert_eq!(
        state
            .integrations
            .decrypt_tokens(&stored)?
            .access_token
            .as_deref(),
        Some("forced")
    );
    Ok(())
}

#[tokio::test]
async fn unknown_integration_is_reported() -> Result<()> {
    let server = MockServer::start().await;
    let state = test_state(&server.uri()).await?;
    let missing = uuid::Uuid::now_v7();

    let cal = &state.cal;
    let err = state
        .tokens
        .execute(missing, |token| async move { cal.list_event_types(&token).await })
        .await
        .unwrap_err();
    assert!(matches!(err, TokenRefreshError::IntegrationNotFound(id) if id == missing));
    Ok(())
}
