// src/lib.rs

use sea_orm::DatabaseConnection;
use services::{google_calendar::GoogleCalendarService, oauth::GoogleOAuthService};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub calendar: GoogleCalendarService,
    pub oauth: GoogleOAuthService,
    /// Where the OAuth callback redirects the browser back to
    pub app_base_url: String,
}

pub mod entities {
    pub mod prelude;
    pub mod appointments;
    pub mod import_jobs;
    pub mod imported_events;
    pub mod patients;
    pub mod sync_conflicts;
    pub mod sync_integrations;
}

pub mod services {
    pub mod conflict_detector;
    pub mod conflict_store;
    pub mod csv_import;
    pub mod event_import;
    pub mod google_calendar;
    pub mod import_pipeline;
    pub mod integrations;
    pub mod oauth;
    pub mod sync_export;
}

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
