//! Database migrations module

pub use sea_orm_migration::prelude::*;

mod m20240601_000001_create_config_entries;
mod m20240601_000002_create_auth_cache;
mod m20240601_000003_create_local_auth_list;
mod m20240601_000004_create_connector_availability;
mod m20240601_000005_create_charging_profiles;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_config_entries::Migration),
            Box::new(m20240601_000002_create_auth_cache::Migration),
            Box::new(m20240601_000003_create_local_auth_list::Migration),
            Box::new(m20240601_000004_create_connector_availability::Migration),
            Box::new(m20240601_000005_create_charging_profiles::Migration),
        ]
    }
}
