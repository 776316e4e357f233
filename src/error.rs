//! # Error Handling
//!
//! Unified API error type for the coachcal service. Every failure renders as
//! `application/problem+json` with a stable `code` and the request's trace id.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::booking::BookingError;
use crate::cal::CalError;
use crate::event_type_sync::EventTypeSyncError;
use crate::telemetry;
use crate::token_refresh::TokenRefreshError;

const CAL_PROVIDER: &str = "cal";

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<C: Into<String>, M: Into<String>>(status: StatusCode, code: C, message: M) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Extract the request's trace ID (falls back to a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code: &str = &code;
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

/// Standard error types with predefined status codes
#[derive(Debug, Error)]
pub enum ErrorType {
    #[error("Bad Request")]
    BadRequest,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not Found")]
    NotFound,
    #[error("Conflict")]
    Conflict,
    #[error("Policy Violation")]
    PolicyViolation,
    #[error("Internal Server Error")]
    InternalServerError,
    #[error("Bad Gateway")]
    BadGateway,
    #[error("Service Unavailable")]
    ServiceUnavailable,
}

impl ErrorType {
    /// Get the appropriate HTTP status code for this error type
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorType::BadRequest => StatusCode::BAD_REQUEST,
            ErrorType::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorType::Forbidden => StatusCode::FORBIDDEN,
            ErrorType::NotFound => StatusCode::NOT_FOUND,
            ErrorType::Conflict => StatusCode::CONFLICT,
            ErrorType::PolicyViolation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorType::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorType::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorType::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error code string for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            ErrorType::BadRequest => "VALIDATION_FAILED",
            ErrorType::Unauthorized => "UNAUTHORIZED",
            ErrorType::Forbidden => "FORBIDDEN",
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::Conflict => "CONFLICT",
            ErrorType::PolicyViolation => "POLICY_VIOLATION",
            ErrorType::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorType::BadGateway => "PROVIDER_ERROR",
            ErrorType::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Builds an [`ApiError`] of this type with a custom message
    pub fn with_message<M: Into<String>>(self, message: M) -> ApiError {
        ApiError::new(self.status_code(), self.error_code(), message)
    }
}

/// Upstream provider error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    /// Provider identifier
    pub provider: String,
    /// HTTP status code from upstream, when one was received
    pub status: Option<u16>,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<ErrorType> for ApiError {
    fn from(error_type: ErrorType) -> Self {
        Self::new(
            error_type.status_code(),
            error_type.error_code(),
            error_type.to_string(),
        )
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err.body_text()),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err.body_text()),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<CalError> for ApiError {
    fn from(error: CalError) -> Self {
        match error {
            CalError::Configuration(message) => {
                tracing::error!(%message, "Cal.com client misconfigured");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Calendar provider is not configured",
                )
            }
            CalError::Unauthorized { status, body } | CalError::Http { status, body } => {
                provider_error(CAL_PROVIDER, Some(status), Some(body))
            }
            CalError::AccessTokenExpired => provider_error(
                CAL_PROVIDER,
                Some(crate::cal::client::ACCESS_TOKEN_EXPIRED_STATUS),
                None,
            ),
            other => {
                tracing::warn!(error = %other, "Cal.com request failed");
                provider_error(CAL_PROVIDER, None, Some(other.to_string()))
            }
        }
    }
}

impl From<TokenRefreshError> for ApiError {
    fn from(error: TokenRefreshError) -> Self {
        match error {
            TokenRefreshError::IntegrationNotFound(id) => ErrorType::NotFound
                .with_message(format!("Calendar integration '{id}' not found")),
            TokenRefreshError::MissingAccessToken(_) | TokenRefreshError::NotRefreshable(_) => {
                ErrorType::Conflict.with_message(error.to_string())
            }
            TokenRefreshError::Cal(cal) => cal.into(),
            TokenRefreshError::Storage(err) => err.into(),
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(error: BookingError) -> Self {
        match error {
            BookingError::NotFound(what) => ErrorType::NotFound.with_message(format!("{what} not found")),
            BookingError::Validation(message) => ErrorType::BadRequest.with_message(message),
            BookingError::Forbidden { .. } => forbidden(Some(&error.to_string())),
            BookingError::PolicyViolation(message) => {
                ErrorType::PolicyViolation.with_message(message)
            }
            BookingError::InvalidState { session_id, status } => ApiError::new(
                StatusCode::CONFLICT,
                "INVALID_STATE",
                error.to_string(),
            )
            .with_details(json!({ "session_id": session_id, "status": status })),
            BookingError::Conflict(_) => ErrorType::Conflict.with_message(error.to_string()),
            BookingError::Provider(err) => err.into(),
            BookingError::Database(err) => err.into(),
        }
    }
}

impl From<EventTypeSyncError> for ApiError {
    fn from(error: EventTypeSyncError) -> Self {
        match error {
            EventTypeSyncError::IntegrationNotFound(id) => ErrorType::NotFound
                .with_message(format!("Calendar integration '{id}' not found")),
            EventTypeSyncError::IntegrationOwnership { .. } => forbidden(Some(&error.to_string())),
            EventTypeSyncError::RemoteFetch(err) => err.into(),
            EventTypeSyncError::LocalFetch(err) => err.into(),
        }
    }
}

/// Create a provider upstream error (always 502)
pub fn provider_error(provider: &str, status: Option<u16>, body: Option<String>) -> ApiError {
    let provider_error = ProviderError {
        provider: provider.to_string(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > 200 {
                let truncated: String = b.chars().take(200).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    let message = match status {
        Some(status) => format!("Provider {} returned error status {}", provider, status),
        None => format!("Provider {} request failed", provider),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message)
        .with_details(json!(provider_error))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a forbidden error (403)
pub fn forbidden(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Insufficient permissions");
    ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

/// Create a not-found error (404)
pub fn not_found(message: &str) -> ApiError {
    ErrorType::NotFound.with_message(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionStatus;
    use uuid::Uuid;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
    }

    #[test]
    fn test_error_type_mapping() {
        let not_found_error: ApiError = ErrorType::NotFound.into();
        assert_eq!(not_found_error.code, Box::from("NOT_FOUND"));
        assert_eq!(not_found_error.message, Box::from("Not Found"));
    }

    #[test]
    fn test_from_anyhow_hides_details() {
        let api_error: ApiError = anyhow::anyhow!("connection string leaked").into();

        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_content_type_header() {
        let response =
            ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error").into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_fallback_format() {
        let error = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", "x");

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("session".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("session"));
    }

    #[test]
    fn cal_http_errors_map_to_provider_error() {
        for status in [400u16, 401, 404, 500, 503] {
            let error: ApiError = if status == 401 {
                CalError::Unauthorized {
                    status,
                    body: "nope".into(),
                }
            } else {
                CalError::Http {
                    status,
                    body: "upstream".into(),
                }
            }
            .into();

            assert_eq!(error.status, StatusCode::BAD_GATEWAY);
            assert_eq!(error.code, Box::from("PROVIDER_ERROR"));
            let details = error.details.unwrap();
            assert_eq!(details["provider"], "cal");
            assert_eq!(details["status"], status);
        }
    }

    #[test]
    fn expired_token_after_retry_is_a_provider_error() {
        let error: ApiError = TokenRefreshError::Cal(CalError::AccessTokenExpired).into();
        assert_eq!(error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(error.details.unwrap()["status"], 498);
    }

    #[test]
    fn booking_errors_map_to_taxonomy() {
        let session_id = Uuid::now_v7();
        let cases: Vec<(BookingError, StatusCode, &str)> = vec![
            (
                BookingError::NotFound("session".into()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                BookingError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
            ),
            (
                BookingError::Forbidden {
                    user_id: Uuid::now_v7(),
                    session_id,
                },
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
            ),
            (
                BookingError::PolicyViolation("too late".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "POLICY_VIOLATION",
            ),
            (
                BookingError::InvalidState {
                    session_id,
                    status: SessionStatus::Cancelled,
                },
                StatusCode::CONFLICT,
                "INVALID_STATE",
            ),
            (
                BookingError::Conflict(session_id),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
        ];

        for (error, status, code) in cases {
            let api: ApiError = error.into();
            assert_eq!(api.status, status);
            assert_eq!(api.code.as_ref(), code);
        }
    }

    #[test]
    fn sync_ownership_error_is_forbidden() {
        let error: ApiError = EventTypeSyncError::IntegrationOwnership {
            integration_id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
        }
        .into();
        assert_eq!(error.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_utf8_safe_truncation() {
        let body = "日本語のエラー本文 ".repeat(40);
        let error = provider_error("cal", Some(500), Some(body));

        let details = error.details.unwrap();
        let snippet = details["body_snippet"].as_str().unwrap();
        assert!(snippet.chars().count() <= 203);
        assert!(snippet.ends_with("..."));
    }
}
