use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::extractors::ClinicId;
use crate::models::import::{
    CalendarImportRequest, CalendarImportResponse, ImportMode, JobIdRequest, JobResponse,
    RunResponse, UploadCsvRequest, UploadCsvResponse, ValidationResponse,
};
use crate::services::{event_import, import_pipeline};
use crate::AppState;

pub async fn upload_csv(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Json(payload): Json<UploadCsvRequest>,
) -> Result<Json<UploadCsvResponse>, AppError> {
    let job = import_pipeline::create_job(
        &state.db,
        clinic_id,
        payload.file_name,
        payload.content,
        payload.job_id,
    )
    .await?;
    Ok(Json(job.into()))
}

/// Phase 1: dry-run validation. Repeatable, writes nothing but the stats
/// recorded on the job itself.
pub async fn validate_csv(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Json(payload): Json<JobIdRequest>,
) -> Result<Json<ValidationResponse>, AppError> {
    let (job, samples) =
        import_pipeline::validate_job(&state.db, clinic_id, payload.job_id).await?;
    Ok(Json(ValidationResponse::from_job(&job, &samples)))
}

/// Phase 2: commit. Partial success is still a 200; the body carries the
/// per-row breakdown.
pub async fn run_csv(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Json(payload): Json<JobIdRequest>,
) -> Result<Json<RunResponse>, AppError> {
    let job = import_pipeline::run_job(&state.db, clinic_id, payload.job_id).await?;
    Ok(Json(job.into()))
}

pub async fn get_job(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, AppError> {
    let job = import_pipeline::get_job(&state.db, clinic_id, job_id).await?;
    Ok(Json(job.into()))
}

/// Downloadable CSV listing the rows that failed validation.
pub async fn error_report(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let job = import_pipeline::get_job(&state.db, clinic_id, job_id).await?;
    let samples = job
        .samples
        .as_ref()
        .and_then(|value| {
            serde_json::from_value::<Vec<crate::services::csv_import::ValidationSample>>(
                value.clone(),
            )
            .ok()
        })
        .ok_or_else(|| {
            AppError::BadRequest(format!("import job {job_id} has not been validated"))
        })?;

    let report = import_pipeline::error_report_csv(&samples);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"import-errors-{job_id}.csv\""),
            ),
        ],
        report,
    ))
}

pub async fn calendar_import(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
    Json(payload): Json<CalendarImportRequest>,
) -> Result<Json<CalendarImportResponse>, AppError> {
    if payload.time_max <= payload.time_min {
        return Err(AppError::BadRequest(
            "time_max must be after time_min".to_string(),
        ));
    }

    let response = match payload.mode {
        ImportMode::Preview => {
            let preview = event_import::preview(
                &state.db,
                &state.calendar,
                &state.oauth,
                clinic_id,
                payload.calendar_id,
                payload.time_min,
                payload.time_max,
            )
            .await?;
            CalendarImportResponse::Preview(preview.into())
        }
        ImportMode::Import => {
            let stats = event_import::run_import(
                &state.db,
                &state.calendar,
                &state.oauth,
                clinic_id,
                payload.calendar_id,
                payload.time_min,
                payload.time_max,
            )
            .await?;
            CalendarImportResponse::Run(stats.into())
        }
    };

    Ok(Json(response))
}
