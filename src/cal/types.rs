//! Request and response bodies exchanged with Cal.com.
//!
//! Field names follow the Cal.com camelCase wire format. Unknown fields are
//! ignored on ingress; optional fields are omitted on egress.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Response envelope shared by every Cal.com v2 endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub status: String,
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<JsonValue>,
}

impl Envelope {
    pub const SUCCESS: &'static str = "success";

    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case(Self::SUCCESS)
    }
}

/// Seat configuration of a group event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Seats {
    pub seats_per_time_slot: i32,
    #[serde(default)]
    pub show_attendee_info: bool,
    #[serde(default)]
    pub show_availability_count: bool,
}

/// Event type as returned by `GET /event-types`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEventType {
    pub id: i64,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub length_in_minutes: i32,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub scheduling_type: Option<String>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub minimum_booking_notice: Option<i32>,
    #[serde(default)]
    pub before_event_buffer: Option<i32>,
    #[serde(default)]
    pub after_event_buffer: Option<i32>,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub seats: Option<Seats>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub locations: Option<JsonValue>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<JsonValue>,
}

/// Body of `POST /event-types`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventTypeInput {
    pub title: String,
    pub slug: String,
    pub length_in_minutes: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_booking_notice: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats: Option<Seats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub locations: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<JsonValue>,
}

/// Body of `PATCH /event-types/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventTypeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_in_minutes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_booking_notice: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats: Option<Seats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub locations: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<JsonValue>,
}

impl UpdateEventTypeInput {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookingAttendee {
    pub name: String,
    pub email: String,
    pub time_zone: String,
}

/// Body of `POST /bookings`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingInput {
    pub start: DateTime<Utc>,
    pub event_type_id: i64,
    pub attendee: BookingAttendee,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_in_minutes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<JsonValue>,
}

/// Body of `POST /bookings/{uid}/cancel`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBooking {
    pub id: i64,
    pub uid: String,
    pub status: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub event_type_id: Option<i64>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub days: Vec<String>,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityOverride {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: i64,
    #[serde(default)]
    pub owner_id: Option<i64>,
    pub name: String,
    pub time_zone: String,
    #[serde(default)]
    pub availability: Vec<Availability>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub overrides: Vec<AvailabilityOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleInput {
    pub name: String,
    pub time_zone: String,
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability: Vec<Availability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<AvailabilityOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<Vec<Availability>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Vec<AvailabilityOverride>>,
}

/// Cal.com managed user created on behalf of a marketplace user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedUser {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateManagedUserInput {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManagedUserInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// OAuth token pair issued by Cal.com
#[derive(Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub access_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for CalTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .finish()
    }
}

/// `data` of `POST /oauth-clients/{clientId}/users`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedManagedUser {
    pub user: ManagedUser,
    #[serde(flatten)]
    pub tokens: CalTokens,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshTokenInput<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectLink {
    pub auth_url: String,
}

/// Calendars that support the hosted connect flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectableCalendar {
    Google,
    Office365,
}

impl ConnectableCalendar {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectableCalendar::Google => "google",
            ConnectableCalendar::Office365 => "office365",
        }
    }
}

impl FromStr for ConnectableCalendar {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(ConnectableCalendar::Google),
            "office365" | "outlook" => Ok(ConnectableCalendar::Office365),
            other => Err(format!("unsupported calendar '{other}'")),
        }
    }
}

/// Accepts epoch milliseconds, epoch seconds or RFC 3339 strings.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => {
            let raw = n
                .as_i64()
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))?;
            // Values past year 2286 in seconds are milliseconds
            let parsed = if raw > 10_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            };
            parsed
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom("invalid epoch timestamp"))
        }
        Some(JsonValue::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected timestamp value {other}"
        ))),
    }
}
