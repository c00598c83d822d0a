use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::models::common::ErrorResponse;

/// Tenant scope for a request. The session layer in front of this service
/// resolves the logged-in user to a clinic and forwards it as a header;
/// every query in the handlers below is filtered by this id.
pub struct ClinicId(pub Uuid);

#[derive(Debug)]
pub struct ClinicIdRejection(String);

impl IntoResponse for ClinicIdRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: self.0 }),
        )
            .into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClinicId {
    type Rejection = ClinicIdRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("X-Clinic-Id")
            .ok_or_else(|| ClinicIdRejection("missing X-Clinic-Id header".to_string()))?;

        let value = header
            .to_str()
            .map_err(|_| ClinicIdRejection("invalid X-Clinic-Id header value".to_string()))?;

        let uuid = Uuid::parse_str(value)
            .map_err(|_| ClinicIdRejection(format!("invalid UUID in X-Clinic-Id: {value}")))?;

        Ok(ClinicId(uuid))
    }
}
