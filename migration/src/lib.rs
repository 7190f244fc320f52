//! Database migrations for the Barid API.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_integrations;
mod m2025_01_10_000002_create_automations;
mod m2025_01_10_000003_create_messages;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_integrations::Migration),
            Box::new(m2025_01_10_000002_create_automations::Migration),
            Box::new(m2025_01_10_000003_create_messages::Migration),
        ]
    }
}
