use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::extractors::ClinicId;
use crate::models::conflict::{
    ConflictListQuery, ConflictListResponse, ConflictResponse, UpdateConflictRequest,
};
use crate::services::conflict_store;
use crate::AppState;

pub async fn list_conflicts(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Query(query): Query<ConflictListQuery>,
) -> Result<Json<ConflictListResponse>, AppError> {
    let status = query.status.as_deref().unwrap_or(conflict_store::STATUS_OPEN);
    if !conflict_store::is_valid_status(status) {
        return Err(AppError::BadRequest(format!(
            "invalid conflict status '{status}'"
        )));
    }

    let conflicts = conflict_store::list_by_status(&state.db, clinic_id, status).await?;
    Ok(Json(ConflictListResponse {
        conflicts: conflicts.into_iter().map(ConflictResponse::from).collect(),
    }))
}

/// Operator resolution. Only flips the audit record; never re-triggers a sync.
pub async fn update_conflict(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Path(conflict_id): Path<Uuid>,
    Json(payload): Json<UpdateConflictRequest>,
) -> Result<Json<ConflictResponse>, AppError> {
    let updated = conflict_store::update_status(
        &state.db,
        clinic_id,
        conflict_id,
        &payload.status,
        payload.resolution,
    )
    .await?;
    Ok(Json(updated.into()))
}
