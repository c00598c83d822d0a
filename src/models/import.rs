use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::import_jobs;
use crate::services::conflict_detector::DetectedConflict;
use crate::services::csv_import::{RowStatus, ValidationSample};
use crate::services::event_import::{CalendarPreview, CalendarRunStats};
use crate::services::import_pipeline::SAMPLE_LIMIT;

#[derive(Debug, Clone, Deserialize)]
pub struct UploadCsvRequest {
    pub content: String,
    pub file_name: String,
    /// Re-upload into an existing wizard session
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadCsvResponse {
    pub job_id: Uuid,
    pub file_name: String,
    pub content_hash: String,
    pub status: String,
}

impl From<import_jobs::Model> for UploadCsvResponse {
    fn from(job: import_jobs::Model) -> Self {
        Self {
            job_id: job.id,
            file_name: job.file_name,
            content_hash: job.content_hash,
            status: job.status,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobIdRequest {
    pub job_id: Uuid,
}

/// First N samples of each category; the full list stays on the job row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleBreakdown {
    pub ok: Vec<ValidationSample>,
    pub warning: Vec<ValidationSample>,
    pub error: Vec<ValidationSample>,
}

impl SampleBreakdown {
    pub fn bounded(samples: &[ValidationSample]) -> Self {
        let mut breakdown = Self::default();
        for sample in samples {
            let bucket = match sample.status {
                RowStatus::Ok => &mut breakdown.ok,
                RowStatus::Warning => &mut breakdown.warning,
                RowStatus::Error => &mut breakdown.error,
            };
            if bucket.len() < SAMPLE_LIMIT {
                bucket.push(sample.clone());
            }
        }
        breakdown
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResponse {
    pub job_id: Uuid,
    pub status: String,
    pub total: i32,
    pub ok: i32,
    pub warnings: i32,
    pub errors: i32,
    pub to_create: i32,
    pub to_update: i32,
    pub samples: SampleBreakdown,
}

impl ValidationResponse {
    pub fn from_job(job: &import_jobs::Model, samples: &[ValidationSample]) -> Self {
        Self {
            job_id: job.id,
            status: job.status.clone(),
            total: job.total_rows,
            ok: job.ok_rows,
            warnings: job.warning_rows,
            errors: job.error_rows,
            to_create: job.to_create,
            to_update: job.to_update,
            samples: SampleBreakdown::bounded(samples),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub job_id: Uuid,
    pub status: String,
    pub total: i32,
    pub created: i32,
    pub updated: i32,
    pub skipped: i32,
    pub failed: i32,
}

impl From<import_jobs::Model> for RunResponse {
    fn from(job: import_jobs::Model) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            total: job.total_rows,
            created: job.created_count,
            updated: job.updated_count,
            skipped: job.skipped_count,
            failed: job.failed_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub kind: String,
    pub file_name: String,
    pub status: String,
    pub total: i32,
    pub ok: i32,
    pub warnings: i32,
    pub errors: i32,
    pub to_create: i32,
    pub to_update: i32,
    pub created: i32,
    pub updated: i32,
    pub skipped: i32,
    pub failed: i32,
    pub samples: SampleBreakdown,
}

impl From<import_jobs::Model> for JobResponse {
    fn from(job: import_jobs::Model) -> Self {
        let samples: Vec<ValidationSample> = job
            .samples
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Self {
            job_id: job.id,
            kind: job.kind,
            file_name: job.file_name,
            status: job.status,
            total: job.total_rows,
            ok: job.ok_rows,
            warnings: job.warning_rows,
            errors: job.error_rows,
            to_create: job.to_create,
            to_update: job.to_update,
            created: job.created_count,
            updated: job.updated_count,
            skipped: job.skipped_count,
            failed: job.failed_count,
            samples: SampleBreakdown::bounded(&samples),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Preview,
    Import,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarImportRequest {
    pub calendar_id: Option<String>,
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
    pub mode: ImportMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictPreview {
    pub external_id: String,
    pub internal_id: Option<Uuid>,
    pub reason: String,
    pub source_of_truth: String,
}

impl From<&DetectedConflict> for ConflictPreview {
    fn from(conflict: &DetectedConflict) -> Self {
        Self {
            external_id: conflict.external_id.clone(),
            internal_id: conflict.internal_id,
            reason: conflict.reason.to_string(),
            source_of_truth: conflict.source_of_truth.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarPreviewResponse {
    pub mode: &'static str,
    pub total: usize,
    pub to_create: usize,
    pub to_update: usize,
    pub skipped: usize,
    pub conflicts: Vec<ConflictPreview>,
}

impl From<CalendarPreview> for CalendarPreviewResponse {
    fn from(preview: CalendarPreview) -> Self {
        Self {
            mode: "preview",
            total: preview.total,
            to_create: preview.to_create,
            to_update: preview.to_update,
            skipped: preview.skipped,
            conflicts: preview.conflicts.iter().map(ConflictPreview::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarRunResponse {
    pub mode: &'static str,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflicts_recorded: usize,
}

impl From<CalendarRunStats> for CalendarRunResponse {
    fn from(stats: CalendarRunStats) -> Self {
        Self {
            mode: "import",
            total: stats.total,
            created: stats.created,
            updated: stats.updated,
            skipped: stats.skipped,
            failed: stats.failed,
            conflicts_recorded: stats.conflicts_recorded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CalendarImportResponse {
    Preview(CalendarPreviewResponse),
    Run(CalendarRunResponse),
}
