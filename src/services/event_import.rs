//! Calendar event import: preview (dry-run) and import (commit) over one
//! time window of the connected Google calendar.
//!
//! Both modes run the same detection pass; preview reports what would
//! happen without writing anything, import executes the plans row by row
//! and persists the detected conflicts.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::entities::appointments::{self, Entity as Appointments};
use crate::entities::imported_events::{self, Entity as ImportedEvents};
use crate::error::AppError;
use crate::services::conflict_detector::{self, DetectionOutcome, EventAction};
use crate::services::conflict_store;
use crate::services::google_calendar::{CalendarApi, RemoteEvent};
use crate::services::integrations;
use crate::services::oauth::GoogleOAuthService;

#[derive(Debug)]
pub struct CalendarPreview {
    pub total: usize,
    pub to_create: usize,
    pub to_update: usize,
    pub skipped: usize,
    pub conflicts: Vec<conflict_detector::DetectedConflict>,
}

#[derive(Debug)]
pub struct CalendarRunStats {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflicts_recorded: usize,
}

async fn detect_window(
    db: &DatabaseConnection,
    calendar: &impl CalendarApi,
    oauth: &GoogleOAuthService,
    integration: &crate::entities::sync_integrations::Model,
    clinic_id: Uuid,
    calendar_id: Option<String>,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
) -> Result<DetectionOutcome, AppError> {
    let calendar_id = calendar_id
        .or_else(|| integration.calendar_id.clone())
        .ok_or_else(|| AppError::BadRequest("no target calendar selected".to_string()))?;

    let access_token = oauth.ensure_fresh_token(db, integration).await?;
    let events = calendar
        .list_events(&access_token, &calendar_id, time_min, time_max)
        .await?;

    let window_appointments = Appointments::find()
        .filter(appointments::Column::ClinicId.eq(clinic_id))
        .filter(appointments::Column::StartsAt.gte(time_min))
        .filter(appointments::Column::StartsAt.lte(time_max))
        .order_by_asc(appointments::Column::StartsAt)
        .all(db)
        .await?;

    let links = ImportedEvents::find()
        .filter(imported_events::Column::ClinicId.eq(clinic_id))
        .all(db)
        .await?;

    let open_keys = conflict_store::open_conflict_keys(db, clinic_id).await?;

    Ok(conflict_detector::detect(
        &events,
        &window_appointments,
        &links,
        &open_keys,
        (time_min, time_max),
    ))
}

fn preview_from_outcome(outcome: DetectionOutcome) -> CalendarPreview {
    let (mut to_create, mut to_update, mut skipped) = (0, 0, 0);
    for plan in &outcome.plans {
        match plan.action {
            EventAction::Create => to_create += 1,
            EventAction::Update { .. } => to_update += 1,
            EventAction::Skip { .. } => skipped += 1,
        }
    }
    CalendarPreview {
        total: outcome.plans.len(),
        to_create,
        to_update,
        skipped,
        conflicts: outcome.conflicts,
    }
}

/// Dry-run over the window. Touches nothing; safe to repeat.
pub async fn preview(
    db: &DatabaseConnection,
    calendar: &impl CalendarApi,
    oauth: &GoogleOAuthService,
    clinic_id: Uuid,
    calendar_id: Option<String>,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
) -> Result<CalendarPreview, AppError> {
    let integration = integrations::require(db, clinic_id).await?;
    let outcome = detect_window(
        db,
        calendar,
        oauth,
        &integration,
        clinic_id,
        calendar_id,
        time_min,
        time_max,
    )
    .await?;
    Ok(preview_from_outcome(outcome))
}

async fn create_appointment_from_event(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    event: &RemoteEvent,
) -> Result<(), AppError> {
    let now = Utc::now();
    let appointment_id = Uuid::new_v4();

    let appointment = appointments::ActiveModel {
        id: Set(appointment_id),
        clinic_id: Set(clinic_id),
        patient_id: Set(None),
        title: Set(event.summary.clone()),
        starts_at: Set(event.starts_at.into()),
        ends_at: Set(event.ends_at.into()),
        notes: Set(event.description.clone()),
        external_event_id: Set(Some(event.id.clone())),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    appointment.insert(db).await?;

    let link = imported_events::ActiveModel {
        id: Set(Uuid::new_v4()),
        clinic_id: Set(clinic_id),
        external_event_id: Set(event.id.clone()),
        appointment_id: Set(appointment_id),
        imported_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    link.insert(db).await?;

    Ok(())
}

async fn update_appointment_from_event(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    appointment_id: Uuid,
    event: &RemoteEvent,
) -> Result<(), AppError> {
    let now = Utc::now();

    let appointment = Appointments::find_by_id(appointment_id)
        .filter(appointments::Column::ClinicId.eq(clinic_id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id} not found")))?;

    let mut active = appointment.into_active_model();
    active.title = Set(event.summary.clone());
    active.starts_at = Set(event.starts_at.into());
    active.ends_at = Set(event.ends_at.into());
    if event.description.is_some() {
        active.notes = Set(event.description.clone());
    }
    active.external_event_id = Set(Some(event.id.clone()));
    active.updated_at = Set(now.into());
    active.update(db).await?;

    // Refresh the link (or create it for a tentative match being adopted)
    let existing_link = ImportedEvents::find()
        .filter(imported_events::Column::ClinicId.eq(clinic_id))
        .filter(imported_events::Column::ExternalEventId.eq(&event.id))
        .one(db)
        .await?;
    match existing_link {
        Some(link) => {
            let mut link = link.into_active_model();
            link.updated_at = Set(now.into());
            link.update(db).await?;
        }
        None => {
            let link = imported_events::ActiveModel {
                id: Set(Uuid::new_v4()),
                clinic_id: Set(clinic_id),
                external_event_id: Set(event.id.clone()),
                appointment_id: Set(appointment_id),
                imported_at: Set(now.into()),
                updated_at: Set(now.into()),
            };
            link.insert(db).await?;
        }
    }

    Ok(())
}

/// Commit pass over the window. Executes the detection plans in batch
/// order; one failing event is counted and the batch continues. The
/// detected conflicts are persisted once per (external id, reason) key.
pub async fn run_import(
    db: &DatabaseConnection,
    calendar: &impl CalendarApi,
    oauth: &GoogleOAuthService,
    clinic_id: Uuid,
    calendar_id: Option<String>,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
) -> Result<CalendarRunStats, AppError> {
    let integration = integrations::require(db, clinic_id).await?;

    let outcome = match detect_window(
        db,
        calendar,
        oauth,
        &integration,
        clinic_id,
        calendar_id,
        time_min,
        time_max,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            integrations::record_failure(db, integration, &e.to_string()).await?;
            return Err(e);
        }
    };

    let mut stats = CalendarRunStats {
        total: outcome.plans.len(),
        created: 0,
        updated: 0,
        skipped: 0,
        failed: 0,
        conflicts_recorded: 0,
    };

    for plan in &outcome.plans {
        match plan.action {
            EventAction::Skip { .. } => stats.skipped += 1,
            EventAction::Create => {
                match create_appointment_from_event(db, clinic_id, &plan.event).await {
                    Ok(()) => stats.created += 1,
                    Err(e) => {
                        tracing::warn!("Calendar import: event {} failed: {}", plan.event.id, e);
                        stats.failed += 1;
                    }
                }
            }
            EventAction::Update { appointment_id } => {
                match update_appointment_from_event(db, clinic_id, appointment_id, &plan.event)
                    .await
                {
                    Ok(()) => stats.updated += 1,
                    Err(e) => {
                        tracing::warn!("Calendar import: event {} failed: {}", plan.event.id, e);
                        stats.failed += 1;
                    }
                }
            }
        }
    }

    for conflict in &outcome.conflicts {
        if conflict_store::create_if_absent(db, clinic_id, conflict).await? {
            stats.conflicts_recorded += 1;
        }
    }

    integrations::record_success(db, integration).await?;

    tracing::info!(
        "Calendar import complete: created={} updated={} skipped={} failed={} conflicts={}",
        stats.created,
        stats.updated,
        stats.skipped,
        stats.failed,
        stats.conflicts_recorded
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conflict_detector::detect;
    use crate::services::google_calendar::INTERNAL_EVENT_MARKER;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;

    fn remote(id: &str, summary: &str, hour: u32) -> RemoteEvent {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap();
        RemoteEvent {
            id: id.to_string(),
            summary: summary.to_string(),
            description: None,
            starts_at: start,
            ends_at: start + Duration::minutes(30),
            updated: None,
        }
    }

    #[test]
    fn test_preview_filters_marker_events_and_counts_stay_consistent() {
        // Five remote events, one of which this system pushed out itself
        let events = vec![
            remote("e1", "Consultation", 9),
            remote("e2", "Détartrage", 10),
            remote("e3", &format!("{INTERNAL_EVENT_MARKER}Pose implant"), 11),
            remote("e4", "Contrôle", 14),
            remote("e5", "Consultation", 16),
        ];
        let window = (
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap(),
        );

        let outcome = detect(&events, &[], &[], &HashSet::new(), window);
        let preview = preview_from_outcome(outcome);

        assert_eq!(preview.total, 4);
        assert_eq!(preview.to_create, 4);
        assert!(preview.conflicts.is_empty());
        assert_eq!(
            preview.to_create + preview.to_update + preview.skipped,
            preview.total
        );
    }
}
