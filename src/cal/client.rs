//! HTTP client for the Cal.com v2 platform API.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::types::*;

/// Status Cal.com returns when an OAuth access token has expired
pub const ACCESS_TOKEN_EXPIRED_STATUS: u16 = 498;

const EVENT_TYPES_API_VERSION: &str = "2024-06-14";
const BOOKINGS_API_VERSION: &str = "2024-08-13";
const SCHEDULES_API_VERSION: &str = "2024-06-11";

const HEADER_API_VERSION: &str = "cal-api-version";
const HEADER_CLIENT_ID: &str = "x-cal-client-id";
const HEADER_SECRET_KEY: &str = "x-cal-secret-key";

/// Longest response body excerpt kept in errors and logs
const MAX_ERROR_BODY_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum CalError {
    #[error("Cal.com access token expired")]
    AccessTokenExpired,

    #[error("Cal.com rejected the credentials with status {status}")]
    Unauthorized { status: u16, body: String },

    #[error("Cal.com request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error talking to Cal.com: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed Cal.com response: {0}")]
    MalformedResponse(String),

    #[error("Cal.com client misconfigured: {0}")]
    Configuration(String),
}

impl CalError {
    /// True only for the signal that warrants a token refresh and one retry
    pub fn is_access_token_expired(&self) -> bool {
        matches!(self, CalError::AccessTokenExpired)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CalError::AccessTokenExpired => Some(ACCESS_TOKEN_EXPIRED_STATUS),
            CalError::Unauthorized { status, .. } | CalError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        let code = status.as_u16();
        match code {
            ACCESS_TOKEN_EXPIRED_STATUS => CalError::AccessTokenExpired,
            401 | 403 => CalError::Unauthorized { status: code, body },
            _ => CalError::Http { status: code, body },
        }
    }
}

/// Connection settings for [`CalClient`]
#[derive(Debug, Clone)]
pub struct CalClientConfig {
    pub api_base: String,
    pub client_id: String,
    pub secret_key: String,
    pub timeout: Duration,
}

/// How a request authenticates against Cal.com
enum Credentials<'a> {
    /// Managed-user OAuth access token
    Bearer(&'a str),
    /// Platform OAuth client id and secret
    Client,
    /// Secret key only, used by the token refresh endpoint
    Secret,
}

#[derive(Clone)]
pub struct CalClient {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    secret_key: String,
}

impl std::fmt::Debug for CalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalClient")
            .field("api_base", &self.api_base)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl CalClient {
    pub fn new(config: &CalClientConfig) -> Result<Self, CalError> {
        let base = Url::parse(config.api_base.trim())
            .map_err(|e| CalError::Configuration(format!("invalid Cal.com API base: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(CalError::Configuration(format!(
                "unsupported scheme '{}' for Cal.com API base",
                base.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("coachcal/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: base.as_str().trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    // ---- event types ----

    #[instrument(skip_all)]
    pub async fn list_event_types(
        &self,
        access_token: &str,
    ) -> Result<Vec<RemoteEventType>, CalError> {
        let request = self.request(
            Method::GET,
            "event-types",
            Some(EVENT_TYPES_API_VERSION),
            Credentials::Bearer(access_token),
        )?;
        self.send_json(request, "list_event_types").await
    }

    #[instrument(skip_all, fields(slug = %input.slug))]
    pub async fn create_event_type(
        &self,
        access_token: &str,
        input: &CreateEventTypeInput,
    ) -> Result<RemoteEventType, CalError> {
        let request = self
            .request(
                Method::POST,
                "event-types",
                Some(EVENT_TYPES_API_VERSION),
                Credentials::Bearer(access_token),
            )?
            .json(input);
        self.send_json(request, "create_event_type").await
    }

    #[instrument(skip_all, fields(event_type_id = event_type_id))]
    pub async fn update_event_type(
        &self,
        access_token: &str,
        event_type_id: i64,
        input: &UpdateEventTypeInput,
    ) -> Result<RemoteEventType, CalError> {
        let request = self
            .request(
                Method::PATCH,
                &format!("event-types/{event_type_id}"),
                Some(EVENT_TYPES_API_VERSION),
                Credentials::Bearer(access_token),
            )?
            .json(input);
        self.send_json(request, "update_event_type").await
    }

    #[instrument(skip_all, fields(event_type_id = event_type_id))]
    pub async fn delete_event_type(
        &self,
        access_token: &str,
        event_type_id: i64,
    ) -> Result<(), CalError> {
        let request = self.request(
            Method::DELETE,
            &format!("event-types/{event_type_id}"),
            Some(EVENT_TYPES_API_VERSION),
            Credentials::Bearer(access_token),
        )?;
        self.send_unit(request, "delete_event_type").await
    }

    // ---- bookings ----

    #[instrument(skip_all, fields(event_type_id = input.event_type_id))]
    pub async fn create_booking(
        &self,
        access_token: &str,
        input: &CreateBookingInput,
    ) -> Result<RemoteBooking, CalError> {
        let request = self
            .request(
                Method::POST,
                "bookings",
                Some(BOOKINGS_API_VERSION),
                Credentials::Bearer(access_token),
            )?
            .json(input);
        self.send_json(request, "create_booking").await
    }

    #[instrument(skip_all, fields(booking_uid = %booking_uid))]
    pub async fn cancel_booking(
        &self,
        access_token: &str,
        booking_uid: &str,
        reason: Option<&str>,
    ) -> Result<(), CalError> {
        let body = CancelBookingInput {
            cancellation_reason: reason.map(str::to_string),
        };
        let request = self
            .request(
                Method::POST,
                &format!("bookings/{booking_uid}/cancel"),
                Some(BOOKINGS_API_VERSION),
                Credentials::Bearer(access_token),
            )?
            .json(&body);
        self.send_unit(request, "cancel_booking").await
    }

    // ---- schedules ----

    #[instrument(skip_all)]
    pub async fn list_schedules(&self, access_token: &str) -> Result<Vec<Schedule>, CalError> {
        let request = self.request(
            Method::GET,
            "schedules",
            Some(SCHEDULES_API_VERSION),
            Credentials::Bearer(access_token),
        )?;
        self.send_json(request, "list_schedules").await
    }

    #[instrument(skip_all)]
    pub async fn create_schedule(
        &self,
        access_token: &str,
        input: &CreateScheduleInput,
    ) -> Result<Schedule, CalError> {
        let request = self
            .request(
                Method::POST,
                "schedules",
                Some(SCHEDULES_API_VERSION),
                Credentials::Bearer(access_token),
            )?
            .json(input);
        self.send_json(request, "create_schedule").await
    }

    #[instrument(skip_all, fields(schedule_id = schedule_id))]
    pub async fn update_schedule(
        &self,
        access_token: &str,
        schedule_id: i64,
        input: &UpdateScheduleInput,
    ) -> Result<Schedule, CalError> {
        let request = self
            .request(
                Method::PATCH,
                &format!("schedules/{schedule_id}"),
                Some(SCHEDULES_API_VERSION),
                Credentials::Bearer(access_token),
            )?
            .json(input);
        self.send_json(request, "update_schedule").await
    }

    #[instrument(skip_all, fields(schedule_id = schedule_id))]
    pub async fn delete_schedule(&self, access_token: &str, schedule_id: i64) -> Result<(), CalError> {
        let request = self.request(
            Method::DELETE,
            &format!("schedules/{schedule_id}"),
            Some(SCHEDULES_API_VERSION),
            Credentials::Bearer(access_token),
        )?;
        self.send_unit(request, "delete_schedule").await
    }

    // ---- managed users ----

    #[instrument(skip_all)]
    pub async fn list_managed_users(&self) -> Result<Vec<ManagedUser>, CalError> {
        let path = format!("oauth-clients/{}/users", self.client_id);
        let request = self.request(Method::GET, &path, None, Credentials::Client)?;
        self.send_json(request, "list_managed_users").await
    }

    #[instrument(skip_all)]
    pub async fn create_managed_user(
        &self,
        input: &CreateManagedUserInput,
    ) -> Result<CreatedManagedUser, CalError> {
        let path = format!("oauth-clients/{}/users", self.client_id);
        let request = self
            .request(Method::POST, &path, None, Credentials::Client)?
            .json(input);
        self.send_json(request, "create_managed_user").await
    }

    #[instrument(skip_all, fields(managed_user_id = managed_user_id))]
    pub async fn update_managed_user(
        &self,
        managed_user_id: i64,
        input: &UpdateManagedUserInput,
    ) -> Result<ManagedUser, CalError> {
        let path = format!("oauth-clients/{}/users/{managed_user_id}", self.client_id);
        let request = self
            .request(Method::PATCH, &path, None, Credentials::Client)?
            .json(input);
        self.send_json(request, "update_managed_user").await
    }

    #[instrument(skip_all, fields(managed_user_id = managed_user_id))]
    pub async fn delete_managed_user(&self, managed_user_id: i64) -> Result<(), CalError> {
        let path = format!("oauth-clients/{}/users/{managed_user_id}", self.client_id);
        let request = self.request(Method::DELETE, &path, None, Credentials::Client)?;
        self.send_unit(request, "delete_managed_user").await
    }

    // ---- calendars ----

    #[instrument(skip_all, fields(calendar = calendar.as_str()))]
    pub async fn calendar_connect_link(
        &self,
        access_token: &str,
        calendar: ConnectableCalendar,
    ) -> Result<ConnectLink, CalError> {
        // Calendars endpoints are unversioned and take no cal-api-version header
        let request = self.request(
            Method::GET,
            &format!("calendars/{}/connect", calendar.as_str()),
            None,
            Credentials::Bearer(access_token),
        )?;
        self.send_json(request, "calendar_connect_link").await
    }

    // ---- oauth ----

    #[instrument(skip_all)]
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<CalTokens, CalError> {
        let path = format!("oauth/{}/refresh", self.client_id);
        let request = self
            .request(Method::POST, &path, None, Credentials::Secret)?
            .json(&RefreshTokenInput { refresh_token });
        self.send_json(request, "refresh_tokens").await
    }

    /// Issues a new token pair without the old refresh token
    #[instrument(skip_all, fields(managed_user_id = managed_user_id))]
    pub async fn force_refresh(&self, managed_user_id: i64) -> Result<CalTokens, CalError> {
        let path = format!(
            "oauth-clients/{}/users/{managed_user_id}/force-refresh",
            self.client_id
        );
        let request = self.request(Method::POST, &path, None, Credentials::Client)?;
        self.send_json(request, "force_refresh").await
    }

    fn endpoint(&self, path: &str) -> Result<Url, CalError> {
        Url::parse(&format!("{}/{}", self.api_base, path.trim_start_matches('/')))
            .map_err(|e| CalError::Configuration(format!("invalid Cal.com endpoint '{path}': {e}")))
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        api_version: Option<&str>,
        credentials: Credentials<'_>,
    ) -> Result<RequestBuilder, CalError> {
        let mut builder = self.http.request(method, self.endpoint(path)?);
        if let Some(version) = api_version {
            builder = builder.header(HEADER_API_VERSION, version);
        }

        builder = match credentials {
            Credentials::Bearer(token) => builder.bearer_auth(token),
            Credentials::Client => {
                self.require_client_credentials()?;
                builder
                    .header(HEADER_CLIENT_ID, &self.client_id)
                    .header(HEADER_SECRET_KEY, &self.secret_key)
            }
            Credentials::Secret => {
                self.require_client_credentials()?;
                builder.header(HEADER_SECRET_KEY, &self.secret_key)
            }
        };

        Ok(builder)
    }

    fn require_client_credentials(&self) -> Result<(), CalError> {
        if self.client_id.is_empty() || self.secret_key.is_empty() {
            return Err(CalError::Configuration(
                "Cal.com OAuth client id and secret key are required".to_string(),
            ));
        }
        Ok(())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, CalError> {
        let data = self
            .send(request, operation)
            .await?
            .ok_or_else(|| CalError::MalformedResponse(format!("{operation}: missing data")))?;

        serde_json::from_value(data)
            .map_err(|e| CalError::MalformedResponse(format!("{operation}: {e}")))
    }

    async fn send_unit(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<(), CalError> {
        self.send(request, operation).await.map(|_| ())
    }

    /// Sends the request, classifies the status and unwraps the envelope
    async fn send(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<Option<serde_json::Value>, CalError> {
        let started = Instant::now();
        let result = self.dispatch(request, operation).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(CalError::AccessTokenExpired) => "token_expired",
            Err(CalError::Unauthorized { .. }) => "unauthorized",
            Err(CalError::Http { .. }) => "http_error",
            Err(CalError::Network(_)) => "network_error",
            Err(_) => "malformed",
        };
        counter!("cal_api_requests_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        histogram!("cal_api_request_duration_seconds", "operation" => operation)
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn dispatch(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<Option<serde_json::Value>, CalError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let excerpt = truncate(&body);
            warn!(operation, status = status.as_u16(), body = %excerpt, "Cal.com request failed");
            return Err(CalError::from_status(status, excerpt));
        }

        debug!(operation, status = status.as_u16(), "Cal.com request succeeded");

        if body.trim().is_empty() {
            return Ok(None);
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| CalError::MalformedResponse(format!("{operation}: {e}")))?;

        if !envelope.is_success() {
            return Err(CalError::MalformedResponse(format!(
                "{operation}: envelope status '{}' with error {}",
                envelope.status,
                envelope.error.map(|e| e.to_string()).unwrap_or_default()
            )));
        }

        Ok(envelope.data)
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LEN {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CalClient {
        CalClient::new(&CalClientConfig {
            api_base: format!("{}/v2", server.uri()),
            client_id: "client-123".to_string(),
            secret_key: "secret-xyz".to_string(),
            timeout: Duration::from_secs(5),
        })
        .expect("client builds")
    }

    fn event_type_json(id: i64, title: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "slug": title.to_lowercase().replace(' ', "-"),
            "lengthInMinutes": 30,
            "hidden": false
        })
    }

    #[tokio::test]
    async fn list_event_types_sends_bearer_and_version_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/event-types"))
            .and(header("authorization", "Bearer token-1"))
            .and(header("cal-api-version", EVENT_TYPES_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": [event_type_json(42, "Intro Call")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let event_types = client_for(&server)
            .list_event_types("token-1")
            .await
            .expect("list succeeds");

        assert_eq!(event_types.len(), 1);
        assert_eq!(event_types[0].id, 42);
        assert_eq!(event_types[0].title, "Intro Call");
    }

    #[tokio::test]
    async fn status_498_is_classified_as_expired_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/event-types"))
            .respond_with(ResponseTemplate::new(498).set_body_string("token expired"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .list_event_types("stale")
            .await
            .expect_err("498 must fail");

        assert!(err.is_access_token_expired());
        assert_eq!(err.status(), Some(498));
    }

    #[tokio::test]
    async fn unauthorized_and_server_errors_are_not_refreshable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/schedules"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/event-types"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let unauthorized = client.list_schedules("t").await.expect_err("401 fails");
        assert!(matches!(unauthorized, CalError::Unauthorized { status: 401, .. }));
        assert!(!unauthorized.is_access_token_expired());

        let unavailable = client.list_event_types("t").await.expect_err("503 fails");
        match unavailable {
            CalError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_envelope_is_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/event-types"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "error": {"code": "BAD"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .list_event_types("t")
            .await
            .expect_err("error envelope fails");
        assert!(matches!(err, CalError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn cancel_booking_posts_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bookings/uid-1/cancel"))
            .and(header("cal-api-version", BOOKINGS_API_VERSION))
            .and(body_json(json!({"cancellationReason": "sick"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"uid": "uid-1", "status": "cancelled"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .cancel_booking("t", "uid-1", Some("sick"))
            .await
            .expect("cancel succeeds");
    }

    #[tokio::test]
    async fn refresh_uses_secret_key_header_and_client_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/client-123/refresh"))
            .and(header("x-cal-secret-key", "secret-xyz"))
            .and(body_json(json!({"refreshToken": "refresh-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "accessToken": "access-2",
                    "refreshToken": "refresh-2",
                    "accessTokenExpiresAt": 1_767_225_600_000_i64
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server)
            .refresh_tokens("refresh-1")
            .await
            .expect("refresh succeeds");
        assert_eq!(tokens.access_token, "access-2");
        assert_eq!(tokens.refresh_token, "refresh-2");
    }

    #[tokio::test]
    async fn managed_user_calls_use_client_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/oauth-clients/client-123/users"))
            .and(header("x-cal-client-id", "client-123"))
            .and(header("x-cal-secret-key", "secret-xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": [{"id": 5, "email": "coach@example.com"}]
            })))
            .mount(&server)
            .await;

        let users = client_for(&server)
            .list_managed_users()
            .await
            .expect("list succeeds");
        assert_eq!(users[0].id, 5);
    }

    #[tokio::test]
    async fn missing_client_credentials_fail_before_sending() {
        let server = MockServer::start().await;
        let client = CalClient::new(&CalClientConfig {
            api_base: server.uri(),
            client_id: String::new(),
            secret_key: String::new(),
            timeout: Duration::from_secs(5),
        })
        .expect("client builds");

        let err = client
            .list_managed_users()
            .await
            .expect_err("credentials are required");
        assert!(matches!(err, CalError::Configuration(_)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn invalid_api_base_is_rejected() {
        let result = CalClient::new(&CalClientConfig {
            api_base: "ftp://cal.example".to_string(),
            client_id: "id".to_string(),
            secret_key: "secret".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(CalError::Configuration(_))));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_LEN + 10);
        let truncated = truncate(&body);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.len(), MAX_ERROR_BODY_LEN + 3);
    }

    #[test]
    fn create_event_type_input_serializes_camel_case() {
        let input = CreateEventTypeInput {
            title: "Intro".into(),
            slug: "intro".into(),
            length_in_minutes: 30,
            minimum_booking_notice: Some(60),
            ..Default::default()
        };
        let value = serde_json::to_value(&input).expect("serializes");
        assert_eq!(value["lengthInMinutes"], 30);
        assert_eq!(value["minimumBookingNotice"], 60);
        assert!(value.get("price").is_none());
    }
}
