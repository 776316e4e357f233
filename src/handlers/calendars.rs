//! Calendar connect links for Google and Office 365.

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::json;

use crate::auth::{RequestContext, UserHeader};
use crate::cal::{ConnectLink, ConnectableCalendar};
use crate::error::{ApiError, validation_error};
use crate::handlers::caller_integration;
use crate::server::AppState;

/// Returns the Cal.com URL that starts the calendar's OAuth consent flow
#[utoipa::path(
    get,
    path = "/calendars/{calendar}/connect",
    security(("bearer_auth" = [])),
    params(
        ("calendar" = String, Path, description = "`google` or `office365`"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Connect link", body = ConnectLink),
        (status = 400, description = "Unsupported calendar", body = ApiError),
        (status = 404, description = "Caller has no calendar integration", body = ApiError),
        (status = 502, description = "Cal.com request failed", body = ApiError)
    ),
    tag = "calendars"
)]
pub async fn calendar_connect_link(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(calendar): Path<String>,
) -> Result<Json<ConnectLink>, ApiError> {
    let calendar: ConnectableCalendar = calendar.parse().map_err(|message: String| {
        validation_error("Unsupported calendar", json!({ "calendar": message }))
    })?;

    let integration = caller_integration(&state, &ctx).await?;
    let cal = &state.cal;
    let link = state
        .tokens
        .execute(integration.id, |token| async move {
            cal.calendar_connect_link(&token, calendar).await
        })
        .await?;

    Ok(Json(link))
}
