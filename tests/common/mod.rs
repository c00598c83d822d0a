use sea_orm::DatabaseConnection;

use dentasync_backend::services::google_calendar::GoogleCalendarService;
use dentasync_backend::services::oauth::GoogleOAuthService;
use dentasync_backend::AppState;

/// App state over a mock database connection. The calendar and OAuth
/// services point at unroutable endpoints; tests that would hit them are
/// expected to fail before any network call.
pub fn test_state(db: DatabaseConnection) -> AppState {
    AppState {
        db,
        calendar: GoogleCalendarService::new("http://127.0.0.1:1/calendar/v3".to_string()),
        oauth: GoogleOAuthService::with_endpoints(
            "test-client".to_string(),
            "test-secret".to_string(),
            "http://127.0.0.1:1/api/sync/google/callback".to_string(),
            "http://127.0.0.1:1/auth".to_string(),
            "http://127.0.0.1:1/token".to_string(),
        ),
        app_base_url: "http://app.test".to_string(),
    }
}
