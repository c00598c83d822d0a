use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use sea_orm::{ActiveModelTrait, DatabaseConnection, IntoActiveModel, Set};
use serde::Deserialize;
use std::time::Duration;

use crate::entities::sync_integrations;
use crate::error::{AppError, CalendarError};

const TOKEN_TIMEOUT_SECS: u64 = 15;
const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// Refresh ahead of expiry so a token never dies mid-sync
const EXPIRY_SLACK_SECS: i64 = 60;

#[derive(Clone)]
pub struct GoogleOAuthService {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    auth_url: String,
    token_url: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl GoogleOAuthService {
    pub fn new(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self::with_endpoints(
            client_id,
            client_secret,
            redirect_url,
            "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            "https://oauth2.googleapis.com/token".to_string(),
        )
    }

    pub fn with_endpoints(
        client_id: String,
        client_secret: String,
        redirect_url: String,
        auth_url: String,
        token_url: String,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(TOKEN_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            client_id,
            client_secret,
            redirect_url,
            auth_url,
            token_url,
        }
    }

    /// Consent-screen URL for a connect attempt. The state parameter is the
    /// CSRF token persisted on the integration row.
    pub fn consent_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            self.auth_url,
            urlencode(&self.client_id),
            urlencode(&self.redirect_url),
            urlencode(CALENDAR_SCOPE),
            urlencode(state),
        )
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, CalendarError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
        ])
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CalendarError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, CalendarError> {
        let response = self.client.post(&self.token_url).form(form).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response.text().await.unwrap_or_default();
        // invalid_grant means the refresh token was revoked or the code
        // was already consumed; both require a fresh connect
        if status.as_u16() == 400 && message.contains("invalid_grant") {
            return Err(CalendarError::AuthExpired);
        }
        Err(CalendarError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Returns a usable access token for the integration, refreshing and
    /// persisting it when the stored one is expired or about to expire.
    pub async fn ensure_fresh_token(
        &self,
        db: &DatabaseConnection,
        integration: &sync_integrations::Model,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let still_valid = integration
            .token_expires_at
            .map(|expires| expires > now + ChronoDuration::seconds(EXPIRY_SLACK_SECS))
            .unwrap_or(false);

        if still_valid {
            if let Some(token) = &integration.access_token {
                return Ok(token.clone());
            }
        }

        let refresh_token = integration
            .refresh_token
            .as_deref()
            .ok_or(AppError::AuthExpired)?;

        tracing::debug!(
            "Refreshing Google access token for clinic {}",
            integration.clinic_id
        );
        let refreshed = self.refresh(refresh_token).await.map_err(AppError::from)?;

        let access_token = refreshed.access_token.clone();
        let mut active = integration.clone().into_active_model();
        active.access_token = Set(Some(refreshed.access_token));
        active.token_expires_at = Set(Some(
            (now + ChronoDuration::seconds(refreshed.expires_in)).into(),
        ));
        if let Some(new_refresh) = refreshed.refresh_token {
            active.refresh_token = Set(Some(new_refresh));
        }
        active.updated_at = Set(now.into());
        active.update(db).await?;

        Ok(access_token)
    }
}

fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}
