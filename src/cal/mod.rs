//! # Cal.com v2 API
//!
//! Typed client for the subset of the Cal.com platform API the marketplace uses:
//! event types, bookings, schedules, managed users, calendar connect links and
//! OAuth token refresh. Every response is validated against the `{status, data}`
//! envelope and converted into the DTOs in [`types`] before it leaves this module.

pub mod client;
pub mod types;

pub use client::{CalClient, CalClientConfig, CalError};
pub use types::*;
