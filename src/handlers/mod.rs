//! # API Handlers
//!
//! HTTP endpoint handlers for the coachcal API.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::RequestContext;
use crate::cal::CalError;
use crate::db;
use crate::error::{ApiError, forbidden, not_found};
use crate::models::ServiceInfo;
use crate::models::calendar_integration;
use crate::models::user::UserRole;
use crate::server::AppState;
use crate::token_refresh::TokenRefreshError;

pub mod calendars;
pub mod event_types;
pub mod managed_users;
pub mod schedules;
pub mod sessions;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: String,
    pub database: bool,
}

/// Reports whether the database answers queries
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service and database are healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match db::health_check(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                database: true,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    database: false,
                }),
            )
        }
    }
}

/// Loads the caller's Cal.com integration, which every pass-through route needs
pub(crate) async fn caller_integration(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<calendar_integration::Model, ApiError> {
    state
        .integrations
        .find_by_user(ctx.user_id)
        .await?
        .ok_or_else(|| not_found("No calendar integration for this user"))
}

/// Rejects callers holding none of `roles`
pub(crate) fn require_any_role(ctx: &RequestContext, roles: &[UserRole]) -> Result<(), ApiError> {
    if roles.iter().any(|role| ctx.has_role(*role)) {
        Ok(())
    } else {
        Err(forbidden(Some("Caller role is not allowed to perform this operation")))
    }
}

/// Surfaces a Cal.com 404 as a local 404 instead of a provider failure
pub(crate) fn remote_lookup_error<E>(err: E, what: &str) -> ApiError
where
    E: Into<ApiError> + RemoteStatus,
{
    if err.remote_status() == Some(404) {
        not_found(&format!("{what} not found"))
    } else {
        err.into()
    }
}

/// Access to the HTTP status Cal.com answered with, when there was one
pub(crate) trait RemoteStatus {
    fn remote_status(&self) -> Option<u16>;
}

impl RemoteStatus for CalError {
    fn remote_status(&self) -> Option<u16> {
        self.status()
    }
}

impl RemoteStatus for TokenRefreshError {
    fn remote_status(&self) -> Option<u16> {
        match self {
            TokenRefreshError::Cal(err) => err.status(),
            _ => None,
        }
    }
}
