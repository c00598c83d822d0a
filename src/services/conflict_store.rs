//! Durable CRUD over sync_conflicts, scoped per clinic.
//!
//! No business logic beyond filtering and the idempotent
//! create-by-(external_id, reason) guarantee the detector relies on.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use std::collections::HashSet;
use uuid::Uuid;

use crate::entities::sync_conflicts::{self, Entity as SyncConflicts};
use crate::error::AppError;
use crate::services::conflict_detector::DetectedConflict;

pub const STATUS_OPEN: &str = "open";
pub const STATUS_RESOLVED: &str = "resolved";
pub const STATUS_IGNORED: &str = "ignored";

pub fn is_valid_status(status: &str) -> bool {
    matches!(status, STATUS_OPEN | STATUS_RESOLVED | STATUS_IGNORED)
}

pub async fn list_by_status(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    status: &str,
) -> Result<Vec<sync_conflicts::Model>, AppError> {
    let conflicts = SyncConflicts::find()
        .filter(sync_conflicts::Column::ClinicId.eq(clinic_id))
        .filter(sync_conflicts::Column::Status.eq(status))
        .order_by_desc(sync_conflicts::Column::DetectedAt)
        .all(db)
        .await?;
    Ok(conflicts)
}

/// (external_id, reason) pairs of the clinic's open conflicts; the
/// detector consults these so repeated passes stay idempotent.
pub async fn open_conflict_keys(
    db: &DatabaseConnection,
    clinic_id: Uuid,
) -> Result<HashSet<(String, String)>, AppError> {
    let open = SyncConflicts::find()
        .filter(sync_conflicts::Column::ClinicId.eq(clinic_id))
        .filter(sync_conflicts::Column::Status.eq(STATUS_OPEN))
        .all(db)
        .await?;

    Ok(open
        .into_iter()
        .map(|c| (c.external_id, c.reason))
        .collect())
}

/// Persists a detected conflict unless an open one already exists for the
/// same (external_id, reason) key. Returns whether a row was inserted.
pub async fn create_if_absent(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    conflict: &DetectedConflict,
) -> Result<bool, AppError> {
    let existing = SyncConflicts::find()
        .filter(sync_conflicts::Column::ClinicId.eq(clinic_id))
        .filter(sync_conflicts::Column::ExternalId.eq(&conflict.external_id))
        .filter(sync_conflicts::Column::Reason.eq(conflict.reason))
        .filter(sync_conflicts::Column::Status.eq(STATUS_OPEN))
        .one(db)
        .await?;

    if existing.is_some() {
        tracing::debug!(
            "Open conflict already recorded for ({}, {})",
            conflict.external_id,
            conflict.reason
        );
        return Ok(false);
    }

    let now = Utc::now();
    let record = sync_conflicts::ActiveModel {
        id: Set(Uuid::new_v4()),
        clinic_id: Set(clinic_id),
        entity_type: Set(conflict.entity_type.to_string()),
        external_id: Set(conflict.external_id.clone()),
        internal_id: Set(conflict.internal_id),
        reason: Set(conflict.reason.to_string()),
        source_of_truth: Set(conflict.source_of_truth.to_string()),
        payload: Set(Some(conflict.payload.clone())),
        status: Set(STATUS_OPEN.to_string()),
        resolution: Set(None),
        detected_at: Set(now.into()),
        resolved_at: Set(None),
    };
    record.insert(db).await?;

    tracing::info!(
        "Recorded sync conflict ({}, {}) for clinic {}",
        conflict.external_id,
        conflict.reason,
        clinic_id
    );

    Ok(true)
}

/// Operator action: mark a conflict resolved or ignored. Never triggers a
/// sync; it only changes the audit record.
pub async fn update_status(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    conflict_id: Uuid,
    status: &str,
    resolution: Option<String>,
) -> Result<sync_conflicts::Model, AppError> {
    if !is_valid_status(status) {
        return Err(AppError::BadRequest(format!(
            "invalid conflict status '{status}'"
        )));
    }

    let conflict = SyncConflicts::find_by_id(conflict_id)
        .filter(sync_conflicts::Column::ClinicId.eq(clinic_id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("conflict {conflict_id} not found")))?;

    let mut active = conflict.into_active_model();
    active.status = Set(status.to_string());
    active.resolution = Set(resolution);
    active.resolved_at = Set(if status == STATUS_OPEN {
        None
    } else {
        Some(Utc::now().into())
    });
    let updated = active.update(db).await?;

    Ok(updated)
}
