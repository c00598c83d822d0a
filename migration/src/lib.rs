pub use sea_orm_migration::prelude::*;

mod m20260210_000001_create_patients;
mod m20260210_000002_create_appointments;
mod m20260211_000001_create_sync_integrations;
mod m20260211_000002_create_import_jobs;
mod m20260212_000001_create_sync_conflicts;
mod m20260212_000002_create_imported_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260210_000001_create_patients::Migration),
            Box::new(m20260210_000002_create_appointments::Migration),
            Box::new(m20260211_000001_create_sync_integrations::Migration),
            Box::new(m20260211_000002_create_import_jobs::Migration),
            Box::new(m20260212_000001_create_sync_conflicts::Migration),
            Box::new(m20260212_000002_create_imported_events::Migration),
        ]
    }
}
