mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use sea_orm::{DatabaseBackend, MockDatabase};
use tower::ServiceExt;

use dentasync_backend::entities::sync_integrations;
use dentasync_backend::handlers;

use crate::common::test_state;

fn callback_router(db: sea_orm::DatabaseConnection) -> Router {
    Router::new()
        .route("/api/sync/google/callback", get(handlers::oauth::callback))
        .with_state(test_state(db))
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_callback_consent_denied_redirects_with_reason() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let app = callback_router(db);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sync/google/callback?error=access_denied")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let target = location(&response);
    assert!(target.starts_with("http://app.test/settings/sync?"));
    assert!(target.ends_with("error=consent_denied"));
}

#[tokio::test]
async fn test_callback_without_code_redirects_missing_params() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let app = callback_router(db);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sync/google/callback?state=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).ends_with("error=missing_params"));
}

#[tokio::test]
async fn test_callback_with_unknown_state_redirects_invalid_state() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<sync_integrations::Model>::new()])
        .into_connection();
    let app = callback_router(db);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sync/google/callback?code=authcode&state=stale-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).ends_with("error=invalid_state"));
}
