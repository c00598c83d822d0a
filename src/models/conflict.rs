use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::sync_conflicts;

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConflictRequest {
    pub status: String,
    /// Operator note, e.g. "kept external version"
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictResponse {
    pub id: Uuid,
    pub entity_type: String,
    pub external_id: String,
    pub internal_id: Option<Uuid>,
    pub reason: String,
    pub source_of_truth: String,
    pub status: String,
    pub resolution: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub detected_at: DateTime<FixedOffset>,
    pub resolved_at: Option<DateTime<FixedOffset>>,
}

impl From<sync_conflicts::Model> for ConflictResponse {
    fn from(model: sync_conflicts::Model) -> Self {
        Self {
            id: model.id,
            entity_type: model.entity_type,
            external_id: model.external_id,
            internal_id: model.internal_id,
            reason: model.reason,
            source_of_truth: model.source_of_truth,
            status: model.status,
            resolution: model.resolution,
            payload: model.payload,
            detected_at: model.detected_at,
            resolved_at: model.resolved_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictListResponse {
    pub conflicts: Vec<ConflictResponse>,
}
