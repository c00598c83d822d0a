use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};

use crate::error::AppError;
use crate::extractors::ClinicId;
use crate::models::sync::{
    CalendarsResponse, IntegrationResponse, SyncRunResponse, UpdateIntegrationRequest,
};
use crate::services::google_calendar::CalendarApi;
use crate::services::{integrations, sync_export};
use crate::AppState;

pub async fn get_integration(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
) -> Result<Json<IntegrationResponse>, AppError> {
    let integration = integrations::require(&state.db, clinic_id).await?;
    Ok(Json(integration.into()))
}

/// Choose the target calendar or toggle the integration.
pub async fn update_integration(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Json(payload): Json<UpdateIntegrationRequest>,
) -> Result<Json<IntegrationResponse>, AppError> {
    let integration = integrations::require(&state.db, clinic_id).await?;

    let mut active = integration.into_active_model();
    if let Some(calendar_id) = payload.calendar_id {
        active.calendar_id = Set(Some(calendar_id));
    }
    if let Some(calendar_name) = payload.calendar_name {
        active.calendar_name = Set(Some(calendar_name));
    }
    if let Some(enabled) = payload.enabled {
        active.enabled = Set(enabled);
    }
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.db).await?;

    Ok(Json(updated.into()))
}

pub async fn disconnect(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
) -> Result<StatusCode, AppError> {
    integrations::delete(&state.db, clinic_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Calendars available on the connected Google account, for the picker.
pub async fn list_calendars(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
) -> Result<Json<CalendarsResponse>, AppError> {
    let integration = integrations::require(&state.db, clinic_id).await?;
    let access_token = state.oauth.ensure_fresh_token(&state.db, &integration).await?;
    let calendars = state.calendar.list_calendars(&access_token).await?;
    Ok(Json(CalendarsResponse { calendars }))
}

/// Export direction: internal appointments out to the Google calendar.
pub async fn run_sync(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
) -> Result<Json<SyncRunResponse>, AppError> {
    let stats = sync_export::run_export(&state.db, &state.calendar, &state.oauth, clinic_id).await?;
    Ok(Json(stats.into()))
}
