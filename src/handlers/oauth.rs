//! Google OAuth connect/callback flow.
//!
//! Connect runs inside the application (tenant header present) and parks a
//! CSRF state token on the integration row. The callback arrives as a bare
//! browser redirect, so the state token is the only way back to the clinic;
//! every outcome ends in a redirect with `connected=1` or `error=<reason>`.

use axum::extract::{Query, State};
use axum::response::Redirect;
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::sync_integrations;
use crate::error::AppError;
use crate::extractors::ClinicId;
use crate::services::integrations;
use crate::AppState;

pub mod error_reasons {
    pub const CONSENT_DENIED: &str = "consent_denied";
    pub const MISSING_PARAMS: &str = "missing_params";
    pub const INVALID_STATE: &str = "invalid_state";
    pub const TOKEN_EXCHANGE_FAILED: &str = "token_exchange_failed";
    pub const SERVER_ERROR: &str = "server_error";
}

pub async fn connect(
    State(state): State<AppState>,
    ClinicId(clinic_id): ClinicId,
) -> Result<Redirect, AppError> {
    let now = Utc::now();
    let state_token = Uuid::new_v4().simple().to_string();

    match integrations::find(&state.db, clinic_id).await? {
        Some(existing) => {
            let mut active = existing.into_active_model();
            active.oauth_state = Set(Some(state_token.clone()));
            active.updated_at = Set(now.into());
            active.update(&state.db).await?;
        }
        None => {
            let integration = sync_integrations::ActiveModel {
                id: Set(Uuid::new_v4()),
                clinic_id: Set(clinic_id),
                provider: Set(integrations::PROVIDER_GOOGLE.to_string()),
                enabled: Set(false),
                calendar_id: Set(None),
                calendar_name: Set(None),
                access_token: Set(None),
                refresh_token: Set(None),
                token_expires_at: Set(None),
                oauth_state: Set(Some(state_token.clone())),
                last_synced_at: Set(None),
                last_error: Set(None),
                error_count: Set(0),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            };
            integration.insert(&state.db).await?;
        }
    }

    tracing::info!("Starting Google OAuth connect for clinic {}", clinic_id);
    Ok(Redirect::temporary(&state.oauth.consent_url(&state_token)))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Redirect {
    let back = |outcome: &str| {
        Redirect::temporary(&format!(
            "{}/settings/sync?{}",
            state.app_base_url, outcome
        ))
    };

    if query.error.is_some() {
        return back(&format!("error={}", error_reasons::CONSENT_DENIED));
    }
    let (Some(code), Some(state_token)) = (query.code, query.state) else {
        return back(&format!("error={}", error_reasons::MISSING_PARAMS));
    };

    let integration = match integrations::find_by_oauth_state(&state.db, &state_token).await {
        Ok(Some(integration)) => integration,
        Ok(None) => return back(&format!("error={}", error_reasons::INVALID_STATE)),
        Err(e) => {
            tracing::error!("OAuth callback: integration lookup failed: {}", e);
            return back(&format!("error={}", error_reasons::SERVER_ERROR));
        }
    };

    let tokens = match state.oauth.exchange_code(&code).await {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!("OAuth callback: token exchange failed: {}", e);
            return back(&format!("error={}", error_reasons::TOKEN_EXCHANGE_FAILED));
        }
    };

    let now = Utc::now();
    let clinic_id = integration.clinic_id;
    let mut active = integration.into_active_model();
    active.access_token = Set(Some(tokens.access_token));
    if let Some(refresh_token) = tokens.refresh_token {
        active.refresh_token = Set(Some(refresh_token));
    }
    active.token_expires_at = Set(Some((now + Duration::seconds(tokens.expires_in)).into()));
    active.oauth_state = Set(None);
    active.enabled = Set(true);
    active.updated_at = Set(now.into());

    if let Err(e) = active.update(&state.db).await {
        tracing::error!("OAuth callback: failed to persist tokens: {}", e);
        return back(&format!("error={}", error_reasons::SERVER_ERROR));
    }

    tracing::info!("Google calendar connected for clinic {}", clinic_id);
    back("connected=1")
}
