//! Database migrations for the coaching calendar service.
//!
//! Tables are created in dependency order; each migration owns one table and
//! its indexes.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_090000_create_users;
mod m2026_01_05_090100_create_calendar_integrations;
mod m2026_01_05_090200_create_cal_event_types;
mod m2026_01_05_090300_create_sessions;
mod m2026_01_05_090400_create_cal_bookings;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_090000_create_users::Migration),
            Box::new(m2026_01_05_090100_create_calendar_integrations::Migration),
            Box::new(m2026_01_05_090200_create_cal_event_types::Migration),
            Box::new(m2026_01_05_090300_create_sessions::Migration),
            Box::new(m2026_01_05_090400_create_cal_bookings::Migration),
        ]
    }
}
