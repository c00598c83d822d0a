use axum::routing::{get, patch, post};
use axum::Router;
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::env;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dentasync_backend::services::google_calendar::GoogleCalendarService;
use dentasync_backend::services::oauth::GoogleOAuthService;
use dentasync_backend::{handlers, AppState};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dentasync_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    tracing::info!("Connecting to database...");
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let calendar = GoogleCalendarService::new(
        env::var("GOOGLE_CALENDAR_API_URL")
            .unwrap_or_else(|_| "https://www.googleapis.com/calendar/v3".to_string()),
    );
    let oauth = GoogleOAuthService::new(
        env::var("GOOGLE_CLIENT_ID").expect("GOOGLE_CLIENT_ID must be set"),
        env::var("GOOGLE_CLIENT_SECRET").expect("GOOGLE_CLIENT_SECRET must be set"),
        env::var("GOOGLE_REDIRECT_URL").expect("GOOGLE_REDIRECT_URL must be set"),
    );
    let app_base_url =
        env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());

    let state = AppState {
        db,
        calendar,
        oauth,
        app_base_url,
    };

    // Build router
    let app = Router::new()
        .route("/", get(health))
        .route("/api/sync/google/connect", get(handlers::oauth::connect))
        .route("/api/sync/google/callback", get(handlers::oauth::callback))
        .route(
            "/api/sync/integration",
            get(handlers::sync::get_integration)
                .put(handlers::sync::update_integration)
                .delete(handlers::sync::disconnect),
        )
        .route("/api/sync/calendars", get(handlers::sync::list_calendars))
        .route("/api/sync/run", post(handlers::sync::run_sync))
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
        .route(
            "/api/import/calendar",
            post(handlers::import::calendar_import),
        )
        .route("/api/conflicts", get(handlers::conflicts::list_conflicts))
        .route(
            "/api/conflicts/{id}",
            patch(handlers::conflicts::update_conflict),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

async fn health() -> &'static str {
    "dentasync-backend up"
}
