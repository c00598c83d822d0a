mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use dentasync_backend::entities::{import_jobs, patients};
use dentasync_backend::handlers;
use dentasync_backend::services::import_pipeline::{self, content_hash};

use crate::common::test_state;

const CLINIC: &str = "7f2c1b6a-9c43-4a8e-8a3e-2f1d9a5b7c01";
const CSV: &str = "Nom,Pr\u{e9}nom,Date de naissance\nDupont,Alice,1985-04-12\nMartin,Paul,1990-06-01\n";

fn import_router(db: sea_orm::DatabaseConnection) -> Router {
    Router::new()
        .route("/api/import/patients", post(handlers::import::upload_csv))
        .route(
            "/api/import/patients/validate",
            post(handlers::import::validate_csv),
        )
        .route("/api/import/patients/run", post(handlers::import::run_csv))
        .route("/api/import/jobs/{id}", get(handlers::import::get_job))
        .route(
            "/api/import/jobs/{id}/errors",
            get(handlers::import::error_report),
        )
        .with_state(test_state(db))
}

fn job_row(status: &str, content: &str, validated_hash: Option<String>) -> import_jobs::Model {
    import_jobs::Model {
        id: Uuid::new_v4(),
        clinic_id: Uuid::parse_str(CLINIC).unwrap(),
        kind: import_pipeline::KIND_PATIENTS_CSV.to_string(),
        file_name: "patients.csv".to_string(),
        content: content.to_string(),
        content_hash: content_hash(content),
        validated_hash,
        status: status.to_string(),
        total_rows: 0,
        ok_rows: 0,
        warning_rows: 0,
        error_rows: 0,
        to_create: 0,
        to_update: 0,
        created_count: 0,
        updated_count: 0,
        skipped_count: 0,
        failed_count: 0,
        samples: None,
        created_at: Utc::now().into(),
        updated_at: Utc::now().into(),
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-Clinic-Id", CLINIC)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_upload_rejects_empty_content() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let app = import_router(db);

    let response = app
        .oneshot(post_json(
            "/api/import/patients",
            json!({"content": "   ", "file_name": "patients.csv"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_creates_job() {
    let job = job_row("uploaded", CSV, None);
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![job.clone()], vec![job.clone()]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            2
        ])
        .into_connection();
    let app = import_router(db);

    let response = app
        .oneshot(post_json(
            "/api/import/patients",
            json!({"content": CSV, "file_name": "patients.csv"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "uploaded");
    assert_eq!(json["content_hash"], content_hash(CSV));
    assert!(json["job_id"].is_string());
}

#[tokio::test]
async fn test_validate_reports_row_breakdown() {
    let job = job_row("uploaded", CSV, None);
    let mut validated = job.clone();
    validated.status = "validated".to_string();
    validated.validated_hash = Some(job.content_hash.clone());
    validated.total_rows = 2;
    validated.ok_rows = 2;
    validated.to_create = 2;
    let job_id = job.id;

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        // job lookup, one patient lookup per row, then the job update
        .append_query_results([vec![job]])
        .append_query_results([Vec::<patients::Model>::new()])
        .append_query_results([Vec::<patients::Model>::new()])
        .append_query_results([vec![validated]])
        .append_exec_results(vec![
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            };
            4
        ])
        .into_connection();
    let app = import_router(db);

    let response = app
        .oneshot(post_json(
            "/api/import/patients/validate",
            json!({"job_id": job_id}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "validated");
    assert_eq!(json["total"], 2);
    assert_eq!(json["ok"], 2);
    assert_eq!(json["errors"], 0);
    assert_eq!(json["to_create"], 2);
    assert_eq!(json["samples"]["ok"].as_array().unwrap().len(), 2);
    assert!(json["samples"]["error"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_run_rejects_stale_content() {
    // Validated against different content than what is stored now
    let job = job_row("validated", CSV, Some("0".repeat(64)));
    let job_id = job.id;

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![job]])
        .into_connection();
    let app = import_router(db);

    let response = app
        .oneshot(post_json(
            "/api/import/patients/run",
            json!({"job_id": job_id}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("validate again"));
}

#[tokio::test]
async fn test_run_rejects_already_completed_job() {
    let job = job_row("complete", CSV, Some(content_hash(CSV)));
    let job_id = job.id;

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![job]])
        .into_connection();
    let app = import_router(db);

    let response = app
        .oneshot(post_json(
            "/api/import/patients/run",
            json!({"job_id": job_id}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_run_requires_prior_validation() {
    let job = job_row("uploaded", CSV, None);
    let job_id = job.id;

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![job]])
        .into_connection();
    let app = import_router(db);

    let response = app
        .oneshot(post_json(
            "/api/import/patients/run",
            json!({"job_id": job_id}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<import_jobs::Model>::new()])
        .into_connection();
    let app = import_router(db);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/import/jobs/{}", Uuid::new_v4()))
                .header("X-Clinic-Id", CLINIC)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_report_downloads_as_csv() {
    let mut job = job_row("validated", CSV, Some(content_hash(CSV)));
    job.error_rows = 1;
    job.samples = Some(json!([
        {
            "row": 1,
            "raw": "SansDate,Un,",
            "status": "error",
            "data": null,
            "errors": [{"field": "date_of_birth", "message": "required field is missing"}],
            "warnings": []
        }
    ]));
    let job_id = job.id;

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![job]])
        .into_connection();
    let app = import_router(db);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/import/jobs/{job_id}/errors"))
                .header("X-Clinic-Id", CLINIC)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/csv"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let report = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(report.starts_with("row,field,message,raw\n"));
    assert!(report.contains("date_of_birth"));
    assert!(report.contains("SansDate"));
}
