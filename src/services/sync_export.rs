//! Export sync: pushes the clinic's upcoming appointments out to the
//! connected Google calendar.
//!
//! Appointments already linked to a remote event are updated in place;
//! unlinked ones are created and the returned event id is stored back for
//! future passes. Events that originated on the remote side (imported
//! ones) are never pushed back out.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use std::collections::HashSet;
use uuid::Uuid;

use crate::entities::appointments::{self, Entity as Appointments};
use crate::entities::imported_events::{self, Entity as ImportedEvents};
use crate::error::{AppError, CalendarError};
use crate::services::google_calendar::CalendarApi;
use crate::services::integrations;
use crate::services::oauth::GoogleOAuthService;

/// How far ahead an export pass looks. Surgical planning rarely goes
/// beyond six months out.
const EXPORT_HORIZON_DAYS: i64 = 180;

#[derive(Debug, Default)]
pub struct ExportStats {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run_export(
    db: &DatabaseConnection,
    calendar: &impl CalendarApi,
    oauth: &GoogleOAuthService,
    clinic_id: Uuid,
) -> Result<ExportStats, AppError> {
    let integration = integrations::require(db, clinic_id).await?;
    if !integration.enabled {
        return Err(AppError::BadRequest(
            "calendar integration is disabled".to_string(),
        ));
    }
    let calendar_id = integration
        .calendar_id
        .clone()
        .ok_or_else(|| AppError::BadRequest("no target calendar selected".to_string()))?;

    match export_pass(db, calendar, oauth, &integration, clinic_id, &calendar_id).await {
        Ok((stats, row_error)) => {
            // Partial failure still counts as a pass with errors; the
            // counter stays visible until a clean pass resets it
            match row_error {
                Some(message) => integrations::record_failure(db, integration, &message).await?,
                None => integrations::record_success(db, integration).await?,
            }
            Ok(stats)
        }
        Err(e) => {
            integrations::record_failure(db, integration, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn export_pass(
    db: &DatabaseConnection,
    calendar: &impl CalendarApi,
    oauth: &GoogleOAuthService,
    integration: &crate::entities::sync_integrations::Model,
    clinic_id: Uuid,
    calendar_id: &str,
) -> Result<(ExportStats, Option<String>), AppError> {
    let access_token = oauth.ensure_fresh_token(db, integration).await?;

    let now = Utc::now();
    let horizon = now + Duration::days(EXPORT_HORIZON_DAYS);

    let upcoming = Appointments::find()
        .filter(appointments::Column::ClinicId.eq(clinic_id))
        .filter(appointments::Column::StartsAt.gte(now))
        .filter(appointments::Column::StartsAt.lte(horizon))
        .order_by_asc(appointments::Column::StartsAt)
        .all(db)
        .await?;

    // Appointments created from remote events are owned by the remote side
    let imported: HashSet<Uuid> = ImportedEvents::find()
        .filter(imported_events::Column::ClinicId.eq(clinic_id))
        .all(db)
        .await?
        .into_iter()
        .map(|link| link.appointment_id)
        .collect();

    let mut stats = ExportStats {
        total: upcoming.len(),
        ..Default::default()
    };
    let mut row_error = None;

    for appointment in upcoming {
        if imported.contains(&appointment.id) {
            stats.skipped += 1;
            continue;
        }

        let had_link = appointment.external_event_id.is_some();
        match calendar
            .upsert_event(&access_token, calendar_id, &appointment)
            .await
        {
            Ok(event_id) => {
                if appointment.external_event_id.as_deref() != Some(event_id.as_str()) {
                    let mut active = appointment.into_active_model();
                    active.external_event_id = Set(Some(event_id));
                    active.update(db).await?;
                }
                if had_link {
                    stats.updated += 1;
                } else {
                    stats.created += 1;
                }
            }
            // A dead token fails every remaining row the same way; abort
            Err(CalendarError::AuthExpired) => return Err(AppError::AuthExpired),
            Err(e) => {
                tracing::warn!("Export sync: appointment {} failed: {}", appointment.id, e);
                row_error = Some(e.to_string());
                stats.failed += 1;
            }
        }
    }

    debug_assert_eq!(
        stats.created + stats.updated + stats.skipped + stats.failed,
        stats.total
    );

    tracing::info!(
        "Export sync complete: created={} updated={} skipped={} failed={} total={}",
        stats.created,
        stats.updated,
        stats.skipped,
        stats.failed,
        stats.total
    );

    Ok((stats, row_error))
}
