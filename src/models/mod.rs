//! # Data Models
//!
//! SeaORM entities for the scheduling tables plus small response types shared
//! by handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod cal_booking;
pub mod cal_event_type;
pub mod calendar_integration;
pub mod session;
pub mod user;

pub use cal_booking::Entity as CalBooking;
pub use cal_event_type::Entity as CalEventType;
pub use calendar_integration::Entity as CalendarIntegration;
pub use session::Entity as Session;
pub use user::Entity as User;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "coachcal".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
