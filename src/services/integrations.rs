//! Sync integration bookkeeping.
//!
//! One row per clinic+provider tracks the connection, the chosen target
//! calendar and the outcome of the last sync attempts. Failures stay
//! visible on the record until a successful pass clears them; the
//! integration is never auto-disabled.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, ModelTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

use crate::entities::sync_integrations::{self, Entity as SyncIntegrations};
use crate::error::AppError;

pub const PROVIDER_GOOGLE: &str = "google";

pub async fn find(
    db: &DatabaseConnection,
    clinic_id: Uuid,
) -> Result<Option<sync_integrations::Model>, AppError> {
    let integration = SyncIntegrations::find()
        .filter(sync_integrations::Column::ClinicId.eq(clinic_id))
        .filter(sync_integrations::Column::Provider.eq(PROVIDER_GOOGLE))
        .one(db)
        .await?;
    Ok(integration)
}

pub async fn require(
    db: &DatabaseConnection,
    clinic_id: Uuid,
) -> Result<sync_integrations::Model, AppError> {
    find(db, clinic_id)
        .await?
        .ok_or_else(|| AppError::NotFound("no calendar integration connected".to_string()))
}

pub async fn find_by_oauth_state(
    db: &DatabaseConnection,
    state: &str,
) -> Result<Option<sync_integrations::Model>, AppError> {
    let integration = SyncIntegrations::find()
        .filter(sync_integrations::Column::OauthState.eq(state))
        .one(db)
        .await?;
    Ok(integration)
}

/// Record a successful sync pass: clears the error state the UI surfaces.
pub async fn record_success(
    db: &DatabaseConnection,
    integration: sync_integrations::Model,
) -> Result<(), AppError> {
    let now = Utc::now();
    let mut active = integration.into_active_model();
    active.last_synced_at = Set(Some(now.into()));
    active.last_error = Set(None);
    active.error_count = Set(0);
    active.updated_at = Set(now.into());
    active.update(db).await?;
    Ok(())
}

/// Record a failed sync pass: bumps the consecutive-error counter and
/// keeps the message visible until a success clears it.
pub async fn record_failure(
    db: &DatabaseConnection,
    integration: sync_integrations::Model,
    error: &str,
) -> Result<(), AppError> {
    let now = Utc::now();
    let error_count = integration.error_count + 1;
    let mut active = integration.into_active_model();
    active.last_error = Set(Some(error.to_string()));
    active.error_count = Set(error_count);
    active.updated_at = Set(now.into());
    active.update(db).await?;

    tracing::warn!("Recorded sync failure #{}: {}", error_count, error);
    Ok(())
}

pub async fn delete(
    db: &DatabaseConnection,
    clinic_id: Uuid,
) -> Result<(), AppError> {
    let integration = require(db, clinic_id).await?;
    integration.delete(db).await?;
    tracing::info!("Disconnected calendar integration for clinic {}", clinic_id);
    Ok(())
}
