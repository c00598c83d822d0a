//! Classification of one batch of remote calendar events against the
//! clinic's appointment records.
//!
//! This module computes what diverged between the two systems without
//! applying any changes. Both the preview and the import paths run it;
//! only the import path persists its output.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::entities::{appointments, imported_events};
use crate::services::google_calendar::RemoteEvent;

pub const ENTITY_APPOINTMENT: &str = "appointment";

pub mod reasons {
    pub const DELETED_EXTERNALLY: &str = "deleted_externally";
    pub const MODIFIED_EXTERNALLY: &str = "modified_externally_without_local_change";
    pub const AMBIGUOUS_MATCH: &str = "ambiguous_match";
}

/// Window for the tentative (title, start time) fallback match. Wide enough
/// to absorb timezone-display edits, narrow enough not to pair adjacent
/// slots with the same treatment name.
const TENTATIVE_MATCH_WINDOW_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Linked appointment matches the event; nothing to do
    Unchanged,
    /// A conflict was raised (or is still open) for this event
    Conflicted,
    /// Both sides changed; the appointment owns its fields, export wins
    LocalEdit,
    /// Import link exists but the appointment is gone locally
    OrphanedLink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Update { appointment_id: Uuid },
    Skip { reason: SkipReason },
}

#[derive(Debug, Clone)]
pub struct EventPlan {
    pub event: RemoteEvent,
    pub action: EventAction,
}

#[derive(Debug, Clone)]
pub struct DetectedConflict {
    pub entity_type: &'static str,
    pub external_id: String,
    pub internal_id: Option<Uuid>,
    pub reason: &'static str,
    pub source_of_truth: &'static str,
    pub payload: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct DetectionOutcome {
    /// One plan per remote event that survived marker filtering, in batch order
    pub plans: Vec<EventPlan>,
    pub conflicts: Vec<DetectedConflict>,
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn event_matches_appointment(event: &RemoteEvent, appointment: &appointments::Model) -> bool {
    event.summary == appointment.title
        && event.starts_at == appointment.starts_at.with_timezone(&Utc)
        && event.ends_at == appointment.ends_at.with_timezone(&Utc)
}

fn within(ts: DateTime<Utc>, window: (DateTime<Utc>, DateTime<Utc>)) -> bool {
    ts >= window.0 && ts <= window.1
}

/// Classifies a batch of remote events against the clinic's appointments.
///
/// `open_conflict_keys` holds (external_id, reason) pairs that already have
/// an open conflict; divergences matching an existing key are not emitted
/// again, so repeated passes over unchanged state converge.
pub fn detect(
    remote_events: &[RemoteEvent],
    appointments: &[appointments::Model],
    links: &[imported_events::Model],
    open_conflict_keys: &HashSet<(String, String)>,
    window: (DateTime<Utc>, DateTime<Utc>),
) -> DetectionOutcome {
    let mut outcome = DetectionOutcome::default();

    // Ids of everything the remote returned, marker events included: an
    // exported appointment whose marker event is still present is not
    // "deleted externally".
    let batch_ids: HashSet<&str> = remote_events.iter().map(|e| e.id.as_str()).collect();

    let by_external_id: HashMap<&str, &appointments::Model> = appointments
        .iter()
        .filter_map(|a| a.external_event_id.as_deref().map(|id| (id, a)))
        .collect();
    let by_id: HashMap<Uuid, &appointments::Model> =
        appointments.iter().map(|a| (a.id, a)).collect();
    let link_by_event: HashMap<&str, &imported_events::Model> = links
        .iter()
        .map(|l| (l.external_event_id.as_str(), l))
        .collect();

    // Fallback candidates: appointments not linked to any remote event yet
    let mut unlinked_by_title: HashMap<String, Vec<&appointments::Model>> = HashMap::new();
    for appointment in appointments {
        if appointment.external_event_id.is_none() {
            unlinked_by_title
                .entry(normalize_title(&appointment.title))
                .or_default()
                .push(appointment);
        }
    }

    let push_conflict = |conflicts: &mut Vec<DetectedConflict>, conflict: DetectedConflict| {
        let key = (conflict.external_id.clone(), conflict.reason.to_string());
        if !open_conflict_keys.contains(&key) {
            conflicts.push(conflict);
        }
    };

    for event in remote_events {
        // Loop-prevention boundary: our own events never come back in
        if event.is_internal_origin() {
            continue;
        }

        let linked = by_external_id.get(event.id.as_str()).copied().or_else(|| {
            link_by_event
                .get(event.id.as_str())
                .and_then(|link| by_id.get(&link.appointment_id).copied())
        });

        let action = if let Some(appointment) = linked {
            if event_matches_appointment(event, appointment) {
                EventAction::Skip {
                    reason: SkipReason::Unchanged,
                }
            } else {
                let locally_edited = link_by_event
                    .get(event.id.as_str())
                    .map(|link| appointment.updated_at > link.updated_at)
                    .unwrap_or(false);

                if locally_edited {
                    // Appointment owns time and title; the export pass will
                    // push the local version back out
                    EventAction::Skip {
                        reason: SkipReason::LocalEdit,
                    }
                } else {
                    push_conflict(
                        &mut outcome.conflicts,
                        DetectedConflict {
                            entity_type: ENTITY_APPOINTMENT,
                            external_id: event.id.clone(),
                            internal_id: Some(appointment.id),
                            reason: reasons::MODIFIED_EXTERNALLY,
                            source_of_truth: "google",
                            payload: json!({
                                "event": event,
                                "appointment_title": appointment.title,
                                "appointment_starts_at": appointment.starts_at,
                                "appointment_ends_at": appointment.ends_at,
                            }),
                        },
                    );
                    EventAction::Skip {
                        reason: SkipReason::Conflicted,
                    }
                }
            }
        } else if link_by_event.contains_key(event.id.as_str()) {
            // Link row survived but the appointment did not; do not
            // resurrect something the clinic deleted
            EventAction::Skip {
                reason: SkipReason::OrphanedLink,
            }
        } else {
            let event_title = normalize_title(&event.summary);
            let candidates: Vec<&appointments::Model> = unlinked_by_title
                .get(&event_title)
                .map(|matches| {
                    matches
                        .iter()
                        .filter(|a| {
                            let delta = a.starts_at.with_timezone(&Utc) - event.starts_at;
                            delta.num_minutes().abs() <= TENTATIVE_MATCH_WINDOW_MINUTES
                        })
                        .copied()
                        .collect()
                })
                .unwrap_or_default();

            match candidates.as_slice() {
                [] => EventAction::Create,
                [single] => EventAction::Update {
                    appointment_id: single.id,
                },
                many => {
                    push_conflict(
                        &mut outcome.conflicts,
                        DetectedConflict {
                            entity_type: ENTITY_APPOINTMENT,
                            external_id: event.id.clone(),
                            internal_id: None,
                            reason: reasons::AMBIGUOUS_MATCH,
                            source_of_truth: "google",
                            payload: json!({
                                "event": event,
                                "candidate_appointments": many.iter().map(|a| a.id).collect::<Vec<_>>(),
                            }),
                        },
                    );
                    EventAction::Skip {
                        reason: SkipReason::Conflicted,
                    }
                }
            }
        };

        outcome.plans.push(EventPlan {
            event: event.clone(),
            action,
        });
    }

    // Linked appointments whose remote event vanished from the queried
    // window. Events outside the window were not fetched, so absence
    // proves nothing about them.
    for appointment in appointments {
        let Some(external_id) = appointment.external_event_id.as_deref() else {
            continue;
        };
        if batch_ids.contains(external_id) {
            continue;
        }
        if !within(appointment.starts_at.with_timezone(&Utc), window) {
            continue;
        }

        push_conflict(
            &mut outcome.conflicts,
            DetectedConflict {
                entity_type: ENTITY_APPOINTMENT,
                external_id: external_id.to_string(),
                internal_id: Some(appointment.id),
                reason: reasons::DELETED_EXTERNALLY,
                source_of_truth: "internal",
                payload: json!({
                    "appointment_title": appointment.title,
                    "appointment_starts_at": appointment.starts_at,
                }),
            },
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::google_calendar::INTERNAL_EVENT_MARKER;
    use chrono::{Duration, TimeZone};

    fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (ts(0, 0), Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap())
    }

    fn remote(id: &str, summary: &str, start: DateTime<Utc>) -> RemoteEvent {
        RemoteEvent {
            id: id.to_string(),
            summary: summary.to_string(),
            description: None,
            starts_at: start,
            ends_at: start + Duration::minutes(30),
            updated: None,
        }
    }

    fn appointment(
        title: &str,
        start: DateTime<Utc>,
        external_event_id: Option<&str>,
    ) -> appointments::Model {
        appointments::Model {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            patient_id: None,
            title: title.to_string(),
            starts_at: start.into(),
            ends_at: (start + Duration::minutes(30)).into(),
            notes: None,
            external_event_id: external_event_id.map(str::to_string),
            created_at: ts(0, 0).into(),
            updated_at: ts(0, 0).into(),
        }
    }

    fn link(event_id: &str, appointment_id: Uuid, updated: DateTime<Utc>) -> imported_events::Model {
        imported_events::Model {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            external_event_id: event_id.to_string(),
            appointment_id,
            imported_at: updated.into(),
            updated_at: updated.into(),
        }
    }

    #[test]
    fn test_marker_events_are_invisible() {
        let events = vec![
            remote("e1", &format!("{INTERNAL_EVENT_MARKER}Pose implant"), ts(9, 0)),
            remote("e2", "Consultation", ts(10, 0)),
        ];

        let outcome = detect(&events, &[], &[], &HashSet::new(), window());

        assert_eq!(outcome.plans.len(), 1);
        assert_eq!(outcome.plans[0].event.id, "e2");
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_new_events_plan_as_create() {
        let events = vec![
            remote("e1", "Consultation", ts(9, 0)),
            remote("e2", "Détartrage", ts(11, 0)),
        ];

        let outcome = detect(&events, &[], &[], &HashSet::new(), window());

        assert_eq!(outcome.plans.len(), 2);
        assert!(outcome
            .plans
            .iter()
            .all(|p| p.action == EventAction::Create));
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_unchanged_linked_event_is_skipped() {
        let appt = appointment("Consultation", ts(9, 0), Some("e1"));
        let events = vec![remote("e1", "Consultation", ts(9, 0))];

        let outcome = detect(&events, &[appt], &[], &HashSet::new(), window());

        assert_eq!(
            outcome.plans[0].action,
            EventAction::Skip {
                reason: SkipReason::Unchanged
            }
        );
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_external_modification_raises_conflict() {
        let appt = appointment("Consultation", ts(9, 0), Some("e1"));
        let links = vec![link("e1", appt.id, ts(0, 30))];
        // Same event, moved one hour later on the remote calendar
        let events = vec![remote("e1", "Consultation", ts(10, 0))];

        let outcome = detect(&events, &[appt.clone()], &links, &HashSet::new(), window());

        assert_eq!(outcome.conflicts.len(), 1);
        let conflict = &outcome.conflicts[0];
        assert_eq!(conflict.reason, reasons::MODIFIED_EXTERNALLY);
        assert_eq!(conflict.external_id, "e1");
        assert_eq!(conflict.internal_id, Some(appt.id));
        assert_eq!(conflict.source_of_truth, "google");
        assert_eq!(
            outcome.plans[0].action,
            EventAction::Skip {
                reason: SkipReason::Conflicted
            }
        );
    }

    #[test]
    fn test_local_edit_wins_without_conflict() {
        let mut appt = appointment("Consultation", ts(9, 0), Some("e1"));
        // Local edit after the last import write
        appt.updated_at = ts(12, 0).into();
        let links = vec![link("e1", appt.id, ts(0, 30))];
        let events = vec![remote("e1", "Consultation", ts(10, 0))];

        let outcome = detect(&events, &[appt], &links, &HashSet::new(), window());

        assert!(outcome.conflicts.is_empty());
        assert_eq!(
            outcome.plans[0].action,
            EventAction::Skip {
                reason: SkipReason::LocalEdit
            }
        );
    }

    #[test]
    fn test_open_conflict_is_not_duplicated() {
        let appt = appointment("Consultation", ts(9, 0), Some("e1"));
        let links = vec![link("e1", appt.id, ts(0, 30))];
        let events = vec![remote("e1", "Consultation", ts(10, 0))];

        let first = detect(&events, &[appt.clone()], &links, &HashSet::new(), window());
        assert_eq!(first.conflicts.len(), 1);

        // Second pass over identical state, with the first pass's conflict open
        let open_keys: HashSet<(String, String)> = first
            .conflicts
            .iter()
            .map(|c| (c.external_id.clone(), c.reason.to_string()))
            .collect();
        let second = detect(&events, &[appt], &links, &open_keys, window());

        assert!(second.conflicts.is_empty());
        // The event still must not be imported while the conflict is open
        assert_eq!(
            second.plans[0].action,
            EventAction::Skip {
                reason: SkipReason::Conflicted
            }
        );
    }

    #[test]
    fn test_externally_deleted_event_raises_conflict() {
        let appt = appointment("Pose implant", ts(9, 0), Some("gone"));

        let outcome = detect(&[], &[appt.clone()], &[], &HashSet::new(), window());

        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].reason, reasons::DELETED_EXTERNALLY);
        assert_eq!(outcome.conflicts[0].external_id, "gone");
        assert_eq!(outcome.conflicts[0].source_of_truth, "internal");
    }

    #[test]
    fn test_out_of_window_appointment_is_not_reported_deleted() {
        // Starts before the queried window; its event was simply not fetched
        let appt = appointment("Pose implant", ts(0, 0) - Duration::days(30), Some("old"));

        let outcome = detect(&[], &[appt], &[], &HashSet::new(), window());

        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_marker_event_presence_counts_against_deletion() {
        // The exported appointment's own marker event is in the batch, so
        // the appointment is not "deleted externally"
        let appt = appointment("Pose implant", ts(9, 0), Some("e1"));
        let events = vec![remote(
            "e1",
            &format!("{INTERNAL_EVENT_MARKER}Pose implant"),
            ts(9, 0),
        )];

        let outcome = detect(&events, &[appt], &[], &HashSet::new(), window());

        assert!(outcome.conflicts.is_empty());
        assert!(outcome.plans.is_empty());
    }

    #[test]
    fn test_tentative_match_adopts_single_candidate() {
        let appt = appointment("Consultation", ts(9, 5), None);
        let events = vec![remote("e1", "Consultation", ts(9, 0))];

        let outcome = detect(&events, &[appt.clone()], &[], &HashSet::new(), window());

        assert_eq!(
            outcome.plans[0].action,
            EventAction::Update {
                appointment_id: appt.id
            }
        );
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_ambiguous_tentative_match_raises_conflict() {
        let a = appointment("Consultation", ts(9, 0), None);
        let b = appointment("Consultation", ts(9, 10), None);
        let events = vec![remote("e1", "Consultation", ts(9, 5))];

        let outcome = detect(&events, &[a, b], &[], &HashSet::new(), window());

        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].reason, reasons::AMBIGUOUS_MATCH);
        assert_eq!(
            outcome.plans[0].action,
            EventAction::Skip {
                reason: SkipReason::Conflicted
            }
        );
    }

    #[test]
    fn test_tentative_match_respects_time_window() {
        // Same title but two hours away; must not be adopted
        let appt = appointment("Consultation", ts(11, 0), None);
        let events = vec![remote("e1", "Consultation", ts(9, 0))];

        let outcome = detect(&events, &[appt], &[], &HashSet::new(), window());

        assert_eq!(outcome.plans[0].action, EventAction::Create);
    }
}
