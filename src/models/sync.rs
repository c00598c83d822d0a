use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::entities::sync_integrations;
use crate::services::google_calendar::CalendarInfo;
use crate::services::sync_export::ExportStats;

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationResponse {
    pub provider: String,
    pub connected: bool,
    pub enabled: bool,
    pub calendar_id: Option<String>,
    pub calendar_name: Option<String>,
    pub last_synced_at: Option<DateTime<FixedOffset>>,
    pub last_error: Option<String>,
    pub error_count: i32,
}

impl From<sync_integrations::Model> for IntegrationResponse {
    fn from(model: sync_integrations::Model) -> Self {
        Self {
            provider: model.provider,
            connected: model.refresh_token.is_some(),
            enabled: model.enabled,
            calendar_id: model.calendar_id,
            calendar_name: model.calendar_name,
            last_synced_at: model.last_synced_at,
            last_error: model.last_error,
            error_count: model.error_count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateIntegrationRequest {
    pub calendar_id: Option<String>,
    pub calendar_name: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunResponse {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
}

impl From<ExportStats> for SyncRunResponse {
    fn from(stats: ExportStats) -> Self {
        Self {
            created: stats.created,
            updated: stats.updated,
            skipped: stats.skipped,
            failed: stats.failed,
            total: stats.total,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarsResponse {
    pub calendars: Vec<CalendarInfo>,
}
