//! # Repository Layer
//!
//! Repositories wrap SeaORM access for each table. Methods suffixed `_with`
//! take any connection so they can participate in a caller's transaction.

pub mod booking;
pub mod calendar_integration;
pub mod event_type;
pub mod session;
pub mod user;

pub use booking::BookingRepository;
pub use calendar_integration::CalendarIntegrationRepository;
pub use event_type::EventTypeRepository;
pub use session::SessionRepository;
pub use user::UserRepository;
