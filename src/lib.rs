//! # coachcal
//!
//! Scheduling back end for a coaching marketplace: mirrors Cal.com event types
//! into a local database, proxies the Cal.com v2 API and runs the session
//! booking and cancellation workflow.

pub mod auth;
pub mod booking;
pub mod cal;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod event_type_sync;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
