//! # Authentication and Caller Context
//!
//! Protected routes require an operator bearer token (the marketplace front end
//! authenticates end users itself) plus an `X-User-Id` header naming the user the
//! request acts for. The middleware resolves that user and attaches a
//! [`RequestContext`] which handlers pass explicitly into the services.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, unauthorized_with_trace_id, validation_error};
use crate::models::user::{self, UserRole};
use crate::repositories::UserRepository;
use crate::server::AppState;
use crate::telemetry::TraceContext;

pub const USER_ID_HEADER: &str = "X-User-Id";

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

/// Identity of the user a request acts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub email: String,
    /// Display name, when the user has one beyond their email
    pub name: Option<String>,
    pub roles: Vec<UserRole>,
}

impl RequestContext {
    pub fn from_user(user: &user::Model) -> Self {
        let display_name = user.display_name();
        Self {
            user_id: user.id,
            name: (display_name != user.email).then_some(display_name),
            email: user.email.clone(),
            roles: vec![user.role],
        }
    }

    pub fn has_role(&self, role: UserRole) -> bool {
        self.roles.contains(&role)
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Validates the operator bearer token and resolves the acting user
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Carry the request trace id into auth failures so they correlate with logs
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    let headers = request.headers();
    let token = extract_bearer_token(headers).map_err(|message| match trace_id.clone() {
        Some(trace_id) => unauthorized_with_trace_id(Some(message), trace_id),
        None => unauthorized(Some(message)),
    })?;
    validate_token(&state.config, token)?;

    let user_id = extract_user_id(headers)?;
    let user = UserRepository::new(Arc::clone(&state.db))
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| unauthorized(Some("Unknown user")))?;

    let context = RequestContext::from_user(&user);
    tracing::debug!(user_id = %context.user_id, roles = ?context.roles, "Authenticated request");

    request.extensions_mut().insert(context);
    request.extensions_mut().insert(OperatorAuth);

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or("Missing Authorization header")?
        .to_str()
        .map_err(|_| "Invalid Authorization header")?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or("Authorization header must use Bearer scheme")
}

fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

fn extract_user_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let header_value = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| {
            validation_error(
                "Missing required header",
                serde_json::json!({ USER_ID_HEADER: "Required header is missing" }),
            )
        })?
        .to_str()
        .map_err(|_| {
            validation_error(
                "Invalid user header",
                serde_json::json!({ USER_ID_HEADER: "Header must be valid UTF-8" }),
            )
        })?;

    header_value.trim().parse::<Uuid>().map_err(|_| {
        validation_error(
            "Invalid user ID",
            serde_json::json!({ USER_ID_HEADER: "Must be a valid UUID" }),
        )
    })
}

/// OpenAPI header parameter for X-User-Id
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct UserHeader {
    /// Identifier (UUID) of the user the request acts for
    #[serde(rename = "X-User-Id")]
    #[param(rename = "X-User-Id", value_type = String)]
    pub user_id: String,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| unauthorized(Some("Caller context missing")))
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}
