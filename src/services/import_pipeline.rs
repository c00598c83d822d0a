//! Import job lifecycle: upload, validate (dry-run), run (commit).
//!
//! The two phases share one validation pass over the stored content, so
//! the run observes exactly the rows, order and classification the
//! preview reported. Nothing is written to the patients table before the
//! run phase, and the run refuses content that no longer matches what was
//! validated.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use uuid::Uuid;

use crate::entities::import_jobs::{self, Entity as ImportJobs};
use crate::entities::patients::{self, Entity as Patients};
use crate::error::AppError;
use crate::services::csv_import::{self, PatientDraft, RowStatus, ValidationSample};

pub const KIND_PATIENTS_CSV: &str = "patients_csv";

/// Bounded number of samples returned per category in API responses; the
/// job row keeps the full list for the error report.
pub const SAMPLE_LIMIT: usize = 20;

pub mod status {
    pub const UPLOADED: &str = "uploaded";
    pub const VALIDATED: &str = "validated";
    pub const RUNNING: &str = "running";
    pub const COMPLETE: &str = "complete";
    pub const FAILED: &str = "failed";
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Natural keys identifying a patient for create-vs-update decisions:
/// the clinic's file number when present, always the identity triple.
pub fn natural_keys(draft: &PatientDraft) -> Vec<String> {
    let mut keys = Vec::with_capacity(2);
    if let Some(file_number) = &draft.file_number {
        keys.push(format!("fn:{}", file_number.to_lowercase()));
    }
    keys.push(format!(
        "id:{}|{}|{}",
        draft.last_name.to_lowercase(),
        draft.first_name.to_lowercase(),
        draft.date_of_birth
    ));
    keys
}

/// Create-vs-update counts for the importable rows, given the natural keys
/// that already exist in the clinic. Rows repeating a key earlier in the
/// same file count as updates, matching what the run phase will do.
pub fn plan_counts(samples: &[ValidationSample], existing_keys: &HashSet<String>) -> (i32, i32) {
    let mut seen = existing_keys.clone();
    let mut to_create = 0;
    let mut to_update = 0;

    for sample in samples {
        let Some(draft) = sample.data.as_ref().filter(|_| sample.status != RowStatus::Error)
        else {
            continue;
        };
        let keys = natural_keys(draft);
        if keys.iter().any(|key| seen.contains(key)) {
            to_update += 1;
        } else {
            to_create += 1;
        }
        seen.extend(keys);
    }

    (to_create, to_update)
}

/// CSV error report for the rows that failed validation.
pub fn error_report_csv(samples: &[ValidationSample]) -> String {
    fn quote(value: &str) -> String {
        format!("\"{}\"", value.replace('"', "\"\""))
    }

    let mut out = String::from("row,field,message,raw\n");
    for sample in samples {
        if sample.status != RowStatus::Error {
            continue;
        }
        for issue in &sample.errors {
            out.push_str(&format!(
                "{},{},{},{}\n",
                sample.row,
                issue.field,
                quote(&issue.message),
                quote(&sample.raw),
            ));
        }
    }
    out
}

pub async fn get_job(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    job_id: Uuid,
) -> Result<import_jobs::Model, AppError> {
    ImportJobs::find_by_id(job_id)
        .filter(import_jobs::Column::ClinicId.eq(clinic_id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("import job {job_id} not found")))
}

/// Stores an upload as a new job, or replaces the content of an existing
/// one (the wizard's "choose another file" path). Replacing the content
/// drops any previous validation result.
pub async fn create_job(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    file_name: String,
    content: String,
    job_id: Option<Uuid>,
) -> Result<import_jobs::Model, AppError> {
    if content.trim().is_empty() {
        return Err(AppError::BadRequest("uploaded file is empty".to_string()));
    }

    let now = Utc::now();
    let hash = content_hash(&content);

    if let Some(existing_id) = job_id {
        let existing = get_job(db, clinic_id, existing_id).await?;
        if existing.status == status::RUNNING || existing.status == status::COMPLETE {
            return Err(AppError::Conflict(format!(
                "import job {existing_id} has already run"
            )));
        }

        let mut active = existing.into_active_model();
        active.file_name = Set(file_name);
        active.content = Set(content);
        active.content_hash = Set(hash);
        active.validated_hash = Set(None);
        active.status = Set(status::UPLOADED.to_string());
        active.samples = Set(None);
        active.updated_at = Set(now.into());
        return Ok(active.update(db).await?);
    }

    let job = import_jobs::ActiveModel {
        id: Set(Uuid::new_v4()),
        clinic_id: Set(clinic_id),
        kind: Set(KIND_PATIENTS_CSV.to_string()),
        file_name: Set(file_name),
        content: Set(content),
        content_hash: Set(hash),
        validated_hash: Set(None),
        status: Set(status::UPLOADED.to_string()),
        total_rows: Set(0),
        ok_rows: Set(0),
        warning_rows: Set(0),
        error_rows: Set(0),
        to_create: Set(0),
        to_update: Set(0),
        created_count: Set(0),
        updated_count: Set(0),
        skipped_count: Set(0),
        failed_count: Set(0),
        samples: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    Ok(job.insert(db).await?)
}

async fn find_existing_patient(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    draft: &PatientDraft,
) -> Result<Option<patients::Model>, AppError> {
    if let Some(file_number) = &draft.file_number {
        let by_file_number = Patients::find()
            .filter(patients::Column::ClinicId.eq(clinic_id))
            .filter(patients::Column::FileNumber.eq(file_number))
            .one(db)
            .await?;
        if by_file_number.is_some() {
            return Ok(by_file_number);
        }
    }

    let by_identity = Patients::find()
        .filter(patients::Column::ClinicId.eq(clinic_id))
        .filter(patients::Column::LastName.eq(&draft.last_name))
        .filter(patients::Column::FirstName.eq(&draft.first_name))
        .filter(patients::Column::DateOfBirth.eq(draft.date_of_birth))
        .one(db)
        .await?;
    Ok(by_identity)
}

/// Flags importable rows that look like an existing patient under a
/// different file number. Soft issue only: the row still imports.
async fn annotate_possible_duplicates(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    samples: &mut [ValidationSample],
) -> Result<(), AppError> {
    for sample in samples.iter_mut() {
        let Some(draft) = sample.data.clone() else {
            continue;
        };
        let Some(file_number) = draft.file_number.clone() else {
            continue;
        };

        let same_identity = Patients::find()
            .filter(patients::Column::ClinicId.eq(clinic_id))
            .filter(patients::Column::LastName.eq(&draft.last_name))
            .filter(patients::Column::FirstName.eq(&draft.first_name))
            .filter(patients::Column::DateOfBirth.eq(draft.date_of_birth))
            .one(db)
            .await?;

        if let Some(existing) = same_identity {
            let other_file_number = existing
                .file_number
                .as_deref()
                .map(|existing_fn| !existing_fn.eq_ignore_ascii_case(&file_number))
                .unwrap_or(false);
            if other_file_number {
                sample.warnings.push(csv_import::RowIssue {
                    field: "file_number".to_string(),
                    message: format!(
                        "existing patient {} {} has file number {}",
                        existing.first_name,
                        existing.last_name,
                        existing.file_number.as_deref().unwrap_or("?")
                    ),
                });
                if sample.status == RowStatus::Ok {
                    sample.status = RowStatus::Warning;
                }
            }
        }
    }
    Ok(())
}

/// Phase 1: validates the stored content and records the result on the
/// job. Repeatable; performs no patient writes.
pub async fn validate_job(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    job_id: Uuid,
) -> Result<(import_jobs::Model, Vec<ValidationSample>), AppError> {
    let job = get_job(db, clinic_id, job_id).await?;
    if job.status == status::RUNNING || job.status == status::COMPLETE {
        return Err(AppError::Conflict(format!(
            "import job {job_id} has already run"
        )));
    }

    let mut samples = match csv_import::validate_content(&job.content) {
        Ok(samples) => samples,
        Err(message) => {
            // Unreadable file: hard failure, the wizard cannot proceed
            let mut active = job.into_active_model();
            active.status = Set(status::FAILED.to_string());
            active.updated_at = Set(Utc::now().into());
            active.update(db).await?;
            return Err(AppError::BadRequest(message));
        }
    };

    annotate_possible_duplicates(db, clinic_id, &mut samples).await?;

    let mut existing_keys = HashSet::new();
    for sample in &samples {
        let Some(draft) = sample.data.as_ref().filter(|_| sample.status != RowStatus::Error)
        else {
            continue;
        };
        if let Some(existing) = find_existing_patient(db, clinic_id, draft).await? {
            existing_keys.extend(natural_keys(draft));
            // The stored row's own keys too, so a later row matching the
            // same patient by the other key also counts as an update
            if let Some(file_number) = &existing.file_number {
                existing_keys.insert(format!("fn:{}", file_number.to_lowercase()));
            }
        }
    }
    let (to_create, to_update) = plan_counts(&samples, &existing_keys);

    let total = samples.len() as i32;
    let ok = samples.iter().filter(|s| s.status == RowStatus::Ok).count() as i32;
    let warnings = samples.iter().filter(|s| s.status == RowStatus::Warning).count() as i32;
    let errors = samples.iter().filter(|s| s.status == RowStatus::Error).count() as i32;

    let validated_hash = job.content_hash.clone();
    let mut active = job.into_active_model();
    active.status = Set(status::VALIDATED.to_string());
    active.validated_hash = Set(Some(validated_hash));
    active.total_rows = Set(total);
    active.ok_rows = Set(ok);
    active.warning_rows = Set(warnings);
    active.error_rows = Set(errors);
    active.to_create = Set(to_create);
    active.to_update = Set(to_update);
    active.samples = Set(Some(serde_json::to_value(&samples).map_err(|e| {
        AppError::Internal(format!("failed to serialize samples: {e}"))
    })?));
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(db).await?;

    tracing::info!(
        "Validated import job {}: total={} ok={} warning={} error={}",
        job_id,
        total,
        ok,
        warnings,
        errors
    );

    Ok((updated, samples))
}

async fn upsert_patient(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    draft: &PatientDraft,
) -> Result<bool, AppError> {
    let now = Utc::now();

    if let Some(existing) = find_existing_patient(db, clinic_id, draft).await? {
        let mut active = existing.into_active_model();
        active.last_name = Set(draft.last_name.clone());
        active.first_name = Set(draft.first_name.clone());
        active.date_of_birth = Set(draft.date_of_birth);
        if draft.sex.is_some() {
            active.sex = Set(draft.sex.clone());
        }
        if draft.phone.is_some() {
            active.phone = Set(draft.phone.clone());
        }
        if draft.email.is_some() {
            active.email = Set(draft.email.clone());
        }
        if draft.file_number.is_some() {
            active.file_number = Set(draft.file_number.clone());
        }
        if draft.national_id.is_some() {
            active.national_id = Set(draft.national_id.clone());
        }
        if draft.address.is_some() {
            active.address = Set(draft.address.clone());
        }
        if draft.postal_code.is_some() {
            active.postal_code = Set(draft.postal_code.clone());
        }
        if draft.city.is_some() {
            active.city = Set(draft.city.clone());
        }
        if draft.country.is_some() {
            active.country = Set(draft.country.clone());
        }
        active.updated_at = Set(now.into());
        active.update(db).await?;
        return Ok(false);
    }

    let patient = patients::ActiveModel {
        id: Set(Uuid::new_v4()),
        clinic_id: Set(clinic_id),
        last_name: Set(draft.last_name.clone()),
        first_name: Set(draft.first_name.clone()),
        date_of_birth: Set(draft.date_of_birth),
        sex: Set(draft.sex.clone()),
        phone: Set(draft.phone.clone()),
        email: Set(draft.email.clone()),
        file_number: Set(draft.file_number.clone()),
        national_id: Set(draft.national_id.clone()),
        address: Set(draft.address.clone()),
        postal_code: Set(draft.postal_code.clone()),
        city: Set(draft.city.clone()),
        country: Set(draft.country.clone()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    patient.insert(db).await?;
    Ok(true)
}

/// Phase 2: commits the rows the validation accepted. Walks rows in
/// validation order; a failing row is counted and the batch continues.
pub async fn run_job(
    db: &DatabaseConnection,
    clinic_id: Uuid,
    job_id: Uuid,
) -> Result<import_jobs::Model, AppError> {
    let job = get_job(db, clinic_id, job_id).await?;

    match job.status.as_str() {
        status::VALIDATED => {}
        status::RUNNING | status::COMPLETE => {
            return Err(AppError::Conflict(format!(
                "import job {job_id} has already run"
            )));
        }
        _ => {
            return Err(AppError::BadRequest(format!(
                "import job {job_id} must be validated before running"
            )));
        }
    }

    // The content must still be what was validated
    let current_hash = content_hash(&job.content);
    if job.validated_hash.as_deref() != Some(current_hash.as_str()) {
        return Err(AppError::StaleJob);
    }

    // Status-transition guard: of two concurrent runs, only the one that
    // flips validated -> running proceeds
    let guard = ImportJobs::update_many()
        .col_expr(
            import_jobs::Column::Status,
            Expr::value(sea_orm::Value::from(status::RUNNING)),
        )
        .col_expr(
            import_jobs::Column::UpdatedAt,
            Expr::value(sea_orm::Value::from(
                sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now()),
            )),
        )
        .filter(import_jobs::Column::Id.eq(job_id))
        .filter(import_jobs::Column::ClinicId.eq(clinic_id))
        .filter(import_jobs::Column::Status.eq(status::VALIDATED))
        .exec(db)
        .await?;
    if guard.rows_affected == 0 {
        return Err(AppError::Conflict(format!(
            "import job {job_id} is already running"
        )));
    }

    let samples = csv_import::validate_content(&job.content)
        .map_err(|message| AppError::BadRequest(message))?;

    let mut created = 0;
    let mut updated = 0;
    let mut skipped = 0;
    let mut failed = 0;

    for sample in &samples {
        let Some(draft) = sample.data.as_ref().filter(|_| sample.status != RowStatus::Error)
        else {
            skipped += 1;
            continue;
        };

        match upsert_patient(db, clinic_id, draft).await {
            Ok(true) => created += 1,
            Ok(false) => updated += 1,
            Err(e) => {
                tracing::warn!("Import job {}: row {} failed: {}", job_id, sample.row, e);
                failed += 1;
            }
        }
    }

    let total = samples.len() as i32;
    debug_assert_eq!(created + updated + skipped + failed, total);

    let mut active = job.into_active_model();
    active.status = Set(status::COMPLETE.to_string());
    active.created_count = Set(created);
    active.updated_count = Set(updated);
    active.skipped_count = Set(skipped);
    active.failed_count = Set(failed);
    active.updated_at = Set(Utc::now().into());
    let finished = active.update(db).await?;

    tracing::info!(
        "Import job {} complete: created={} updated={} skipped={} failed={} total={}",
        job_id,
        created,
        updated,
        skipped,
        failed,
        total
    );

    Ok(finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn draft(last: &str, first: &str, file_number: Option<&str>) -> PatientDraft {
        PatientDraft {
            last_name: last.to_string(),
            first_name: first.to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 4, 12).unwrap(),
            sex: None,
            phone: None,
            email: None,
            file_number: file_number.map(str::to_string),
            national_id: None,
            address: None,
            postal_code: None,
            city: None,
            country: None,
        }
    }

    fn sample(status: RowStatus, data: Option<PatientDraft>) -> ValidationSample {
        ValidationSample {
            row: 1,
            raw: String::new(),
            status,
            data,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_content_hash_is_stable_and_content_sensitive() {
        let a = content_hash("Nom,Prénom\nDupont,Alice\n");
        let b = content_hash("Nom,Prénom\nDupont,Alice\n");
        let c = content_hash("Nom,Prénom\nDupont,Bob\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_natural_keys_prefer_file_number_but_keep_identity() {
        let keys = natural_keys(&draft("Dupont", "Alice", Some("D-001")));
        assert_eq!(keys, vec!["fn:d-001", "id:dupont|alice|1985-04-12"]);

        let keys = natural_keys(&draft("Dupont", "Alice", None));
        assert_eq!(keys, vec!["id:dupont|alice|1985-04-12"]);
    }

    #[test]
    fn test_plan_counts_against_existing_and_in_batch_duplicates() {
        let samples = vec![
            sample(RowStatus::Ok, Some(draft("Dupont", "Alice", Some("D-001")))),
            // Same file number again later in the file
            sample(RowStatus::Ok, Some(draft("Dupont", "Alicia", Some("D-001")))),
            sample(RowStatus::Ok, Some(draft("Martin", "Paul", None))),
            // Error rows never count toward create/update
            sample(RowStatus::Error, Some(draft("Broken", "Row", None))),
        ];

        let existing: HashSet<String> = ["id:martin|paul|1985-04-12".to_string()].into();
        let (to_create, to_update) = plan_counts(&samples, &existing);
        assert_eq!(to_create, 1);
        assert_eq!(to_update, 2);
    }

    #[test]
    fn test_error_report_lists_only_error_rows() {
        let mut bad = sample(RowStatus::Error, None);
        bad.row = 3;
        bad.raw = "SansDate,Un,".to_string();
        bad.errors.push(csv_import::RowIssue {
            field: "date_of_birth".to_string(),
            message: "required field is missing".to_string(),
        });
        let good = sample(RowStatus::Ok, Some(draft("Dupont", "Alice", None)));

        let report = error_report_csv(&[good, bad]);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "row,field,message,raw");
        assert!(lines[1].starts_with("3,date_of_birth,"));
        assert!(lines[1].contains("SansDate"));
    }
}
