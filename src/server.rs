//! # Server Configuration
//!
//! Application state, router assembly and the HTTP server lifecycle.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{
        HeaderName, HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, patch, post},
};
use sea_orm::DatabaseConnection;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{USER_ID_HEADER, auth_middleware};
use crate::booking::BookingService;
use crate::cal::{CalClient, CalClientConfig, CalError};
use crate::config::AppConfig;
use crate::crypto::{CryptoError, CryptoKey};
use crate::event_type_sync::EventTypeSyncService;
use crate::handlers;
use crate::repositories::{CalendarIntegrationRepository, EventTypeRepository};
use crate::telemetry::{TRACE_ID_HEADER, trace_context_middleware};
use crate::token_refresh::TokenRefreshService;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("crypto key is not configured")]
    MissingCryptoKey,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("failed to build Cal.com client: {0}")]
    Cal(#[from] CalError),
    #[error("invalid server address: {0}")]
    InvalidAddr(#[from] std::net::AddrParseError),
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub cal: CalClient,
    pub integrations: CalendarIntegrationRepository,
    pub event_types: EventTypeRepository,
    pub tokens: TokenRefreshService,
    pub event_type_sync: EventTypeSyncService,
    pub bookings: BookingService,
}

impl AppState {
    /// Wires every service from configuration and a connected pool
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Result<Self, ServerError> {
        let crypto_key =
            CryptoKey::new(config.crypto_key.clone().ok_or(ServerError::MissingCryptoKey)?)?;

        let cal = CalClient::new(&CalClientConfig {
            api_base: config.cal.api_base.clone(),
            client_id: config.cal.client_id.clone().unwrap_or_default(),
            secret_key: config.cal.secret_key.clone().unwrap_or_default(),
            timeout: Duration::from_secs(config.cal.http_timeout_seconds),
        })?;

        let integrations = CalendarIntegrationRepository::new(Arc::clone(&db), crypto_key);
        let tokens = TokenRefreshService::new(
            cal.clone(),
            integrations.clone(),
            config.token_refresh.lead_time_seconds,
        );
        let event_type_sync = EventTypeSyncService::new(
            Arc::clone(&db),
            cal.clone(),
            integrations.clone(),
            tokens.clone(),
            config.event_type_sync.delete_missing,
        );
        let bookings = BookingService::new(
            Arc::clone(&db),
            cal.clone(),
            integrations.clone(),
            tokens.clone(),
            config.booking.cancellation_window_hours,
        );

        Ok(Self {
            event_types: EventTypeRepository::new(Arc::clone(&db)),
            config,
            db,
            cal,
            integrations,
            tokens,
            event_type_sync,
            bookings,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    let protected = Router::new()
        .route(
            "/event-types",
            get(handlers::event_types::list_event_types).post(handlers::event_types::create_event_type),
        )
        .route("/event-types/sync", post(handlers::event_types::sync_event_types))
        .route(
            "/event-types/{id}",
            patch(handlers::event_types::update_event_type)
                .delete(handlers::event_types::delete_event_type),
        )
        .route(
            "/schedules",
            get(handlers::schedules::list_schedules).post(handlers::schedules::create_schedule),
        )
        .route(
            "/schedules/{id}",
            patch(handlers::schedules::update_schedule).delete(handlers::schedules::delete_schedule),
        )
        .route(
            "/managed-users",
            get(handlers::managed_users::list_managed_users)
                .post(handlers::managed_users::create_managed_user),
        )
        .route(
            "/managed-users/{id}",
            patch(handlers::managed_users::update_managed_user)
                .delete(handlers::managed_users::delete_managed_user),
        )
        .route(
            "/calendars/{calendar}/connect",
            get(handlers::calendars::calendar_connect_link),
        )
        .route("/bookings", post(handlers::sessions::book_session))
        .route("/sessions/{id}/cancel", post(handlers::sessions::cancel_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(cors)
}

/// Origins are validated with the rest of the configuration
fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim_end_matches('/')).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-user-id"),
            TRACE_ID_HEADER,
        ])
        .expose_headers([TRACE_ID_HEADER])
        .max_age(Duration::from_secs(3600))
}

/// Serves until `shutdown` is cancelled, then drains in-flight requests
pub async fn run_server(
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr = config.bind_addr()?;
    let state = AppState::new(Arc::clone(&config), db)?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Cancels `token` on Ctrl-C or SIGTERM
pub fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => info!("Received Ctrl-C, shutting down"),
            () = terminate => info!("Received SIGTERM, shutting down"),
        }
        token.cancel();
    });
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some(format!(
                        "Operator token; every protected request also carries {USER_ID_HEADER}"
                    )))
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::event_types::list_event_types,
        crate::handlers::event_types::create_event_type,
        crate::handlers::event_types::update_event_type,
        crate::handlers::event_types::delete_event_type,
        crate::handlers::event_types::sync_event_types,
        crate::handlers::schedules::list_schedules,
        crate::handlers::schedules::create_schedule,
        crate::handlers::schedules::update_schedule,
        crate::handlers::schedules::delete_schedule,
        crate::handlers::managed_users::list_managed_users,
        crate::handlers::managed_users::create_managed_user,
        crate::handlers::managed_users::update_managed_user,
        crate::handlers::managed_users::delete_managed_user,
        crate::handlers::calendars::calendar_connect_link,
        crate::handlers::sessions::book_session,
        crate::handlers::sessions::cancel_session,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::handlers::event_types::EventTypeResponse,
            crate::handlers::event_types::EventTypeListResponse,
            crate::handlers::event_types::CreateEventTypeRequest,
            crate::handlers::event_types::UpdateEventTypeRequest,
            crate::event_type_sync::SyncReport,
            crate::cal::Schedule,
            crate::cal::Availability,
            crate::cal::AvailabilityOverride,
            crate::cal::CreateScheduleInput,
            crate::cal::UpdateScheduleInput,
            crate::cal::ManagedUser,
            crate::cal::UpdateManagedUserInput,
            crate::cal::ConnectLink,
            crate::cal::ConnectableCalendar,
            crate::handlers::managed_users::CreateManagedUserRequest,
            crate::handlers::managed_users::ManagedUserCreatedResponse,
            crate::handlers::sessions::SessionResponse,
            crate::handlers::sessions::BookingResponse,
            crate::handlers::sessions::SessionBookingResponse,
            crate::handlers::sessions::CancelSessionBody,
            crate::booking::BookSessionRequest,
            crate::models::cal_event_type::SchedulingType,
            crate::models::session::SessionStatus,
            crate::models::cal_booking::BookingStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service metadata"),
        (name = "event-types", description = "Coach event types mirrored from Cal.com"),
        (name = "schedules", description = "Cal.com availability schedules"),
        (name = "managed-users", description = "Cal.com managed users"),
        (name = "calendars", description = "External calendar connections"),
        (name = "sessions", description = "Session booking and cancellation"),
    ),
    info(
        title = "coachcal API",
        description = "Scheduling back end mirroring Cal.com for the coaching marketplace",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
