//! # Managed User Handlers
//!
//! Cal.com managed users are created with the platform OAuth client
//! credentials. Creating one for the caller stores the issued token pair as
//! the caller's encrypted calendar integration.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{RequestContext, UserHeader};
use crate::cal::{CreateManagedUserInput, ManagedUser, UpdateManagedUserInput};
use crate::error::{ApiError, ErrorType, forbidden, validation_error};
use crate::handlers::{remote_lookup_error, require_any_role};
use crate::models::user::UserRole;
use crate::repositories::calendar_integration::ManagedIdentity;
use crate::server::AppState;

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateManagedUserRequest {
    /// IANA time zone; Cal.com defaults to Europe/London when absent
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Display name; defaults to the caller's name
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ManagedUserCreatedResponse {
    pub managed_user: ManagedUser,
    #[schema(value_type = String)]
    pub calendar_integration_id: Uuid,
    pub access_token_expires_at: Option<String>,
}

/// Lists every managed user of the platform OAuth client
#[utoipa::path(
    get,
    path = "/managed-users",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Managed users", body = [ManagedUser]),
        (status = 403, description = "Caller is not an admin", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "managed-users"
)]
pub async fn list_managed_users(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<ManagedUser>>, ApiError> {
    require_any_role(&ctx, &[UserRole::Admin])?;
    Ok(Json(state.cal.list_managed_users().await?))
}

/// Creates a Cal.com managed user for the caller and stores its tokens
#[utoipa::path(
    post,
    path = "/managed-users",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = CreateManagedUserRequest,
    responses(
        (status = 201, description = "Managed user created", body = ManagedUserCreatedResponse),
        (status = 409, description = "Caller already has a managed user", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "managed-users"
)]
pub async fn create_managed_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateManagedUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ManagedUserCreatedResponse>), ApiError> {
    let Json(request) = payload?;

    if request
        .time_zone
        .as_ref()
        .is_some_and(|tz| tz.trim().is_empty())
    {
        return Err(validation_error(
            "Invalid managed user",
            json!({ "time_zone": "Must not be empty" }),
        ));
    }

    if let Some(existing) = state.integrations.find_by_user(ctx.user_id).await? {
        if let Some(managed_user_id) = existing.cal_managed_user_id {
            return Err(ErrorType::Conflict
                .with_message("Caller already has a Cal.com managed user")
                .with_details(json!({ "managed_user_id": managed_user_id })));
        }
    }

    let input = CreateManagedUserInput {
        email: ctx.email.clone(),
        name: request.name.or_else(|| ctx.name.clone()),
        time_zone: request.time_zone,
    };
    let created = state.cal.create_managed_user(&input).await?;

    let integration = state
        .integrations
        .upsert_for_user(
            ctx.user_id,
            Some(ManagedIdentity {
                managed_user_id: created.user.id,
                username: created.user.username.clone(),
            }),
            &created.tokens,
        )
        .await
        .map_err(|err| {
            let message = format!("{err:#}");
            warn!(
                managed_user_id = created.user.id,
                error = %message,
                "Managed user created on Cal.com but the integration was not stored"
            );
            ApiError::from(err)
        })?;

    info!(
        managed_user_id = created.user.id,
        integration_id = %integration.id,
        "Managed user created"
    );

    Ok((
        StatusCode::CREATED,
        Json(ManagedUserCreatedResponse {
            managed_user: created.user,
            calendar_integration_id: integration.id,
            access_token_expires_at: integration
                .access_token_expires_at
                .map(|expires_at| expires_at.to_rfc3339()),
        }),
    ))
}

#[utoipa::path(
    patch,
    path = "/managed-users/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Cal.com managed user id"),
        UserHeader
    ),
    request_body = UpdateManagedUserInput,
    responses(
        (status = 200, description = "Managed user updated", body = ManagedUser),
        (status = 403, description = "Managed user belongs to someone else", body = ApiError),
        (status = 404, description = "Managed user not found", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "managed-users"
)]
pub async fn update_managed_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
    payload: Result<Json<UpdateManagedUserInput>, JsonRejection>,
) -> Result<Json<ManagedUser>, ApiError> {
    let Json(input) = payload?;
    ensure_can_manage(&state, &ctx, id).await?;

    let updated = state
        .cal
        .update_managed_user(id, &input)
        .await
        .map_err(|err| remote_lookup_error(err, "Managed user"))?;
    Ok(Json(updated))
}

/// Deletes the managed user on Cal.com and the integration bound to it
#[utoipa::path(
    delete,
    path = "/managed-users/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Cal.com managed user id"),
        UserHeader
    ),
    responses(
        (status = 204, description = "Managed user deleted"),
        (status = 403, description = "Managed user belongs to someone else", body = ApiError),
        (status = 404, description = "Managed user not found", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "managed-users"
)]
pub async fn delete_managed_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ensure_can_manage(&state, &ctx, id).await?;

    state
        .cal
        .delete_managed_user(id)
        .await
        .map_err(|err| remote_lookup_error(err, "Managed user"))?;

    let removed = state.integrations.delete_by_managed_user(id).await?;
    info!(managed_user_id = id, integration_removed = removed, "Managed user deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Admins manage any managed user; everyone else only their own
async fn ensure_can_manage(
    state: &AppState,
    ctx: &RequestContext,
    managed_user_id: i64,
) -> Result<(), ApiError> {
    if ctx.has_role(UserRole::Admin) {
        return Ok(());
    }

    let owns = state
        .integrations
        .find_by_user(ctx.user_id)
        .await?
        .is_some_and(|integration| integration.cal_managed_user_id == Some(managed_user_id));

    if owns {
        Ok(())
    } else {
        Err(forbidden(Some("Managed user belongs to another user")))
    }
}
