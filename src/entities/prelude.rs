pub use super::appointments::Entity as Appointments;
pub use super::import_jobs::Entity as ImportJobs;
pub use super::imported_events::Entity as ImportedEvents;
pub use super::patients::Entity as Patients;
pub use super::sync_conflicts::Entity as SyncConflicts;
pub use super::sync_integrations::Entity as SyncIntegrations;
