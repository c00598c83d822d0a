use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::entities::appointments;
use crate::error::CalendarError;

/// Prefix stamped on the title of every event this service creates on the
/// remote calendar. Inbound listings use it to recognize their own events
/// and skip them, which is what breaks the sync loop.
pub const INTERNAL_EVENT_MARKER: &str = "[DentaSync] ";

const REQUEST_TIMEOUT_SECS: u64 = 15;
const RATE_LIMIT_ATTEMPTS: u32 = 3;
const RATE_LIMIT_BASE_DELAY_MS: u64 = 500;
const EVENTS_PAGE_SIZE: u32 = 2500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarInfo {
    pub id: String,
    pub summary: String,
}

/// A calendar event as seen from the provider, already normalized to UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
}

impl RemoteEvent {
    /// True for events this system pushed out itself.
    pub fn is_internal_origin(&self) -> bool {
        self.summary.starts_with(INTERNAL_EVENT_MARKER)
    }
}

/// Seam to the external calendar. The import and sync services only see
/// this trait, so tests drive them with a stub instead of the network.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list_calendars(&self, access_token: &str) -> Result<Vec<CalendarInfo>, CalendarError>;

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<RemoteEvent>, CalendarError>;

    /// Creates or updates the remote event mirroring an appointment and
    /// returns the external event id for linkage.
    async fn upsert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        appointment: &appointments::Model,
    ) -> Result<String, CalendarError>;

    /// Removes a previously created event. "Already gone" is success.
    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), CalendarError>;
}

#[derive(Clone)]
pub struct GoogleCalendarService {
    client: Client,
    base_url: String,
    calendar_cache: Arc<Cache<String, Vec<CalendarInfo>>>,
}

#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Debug, Deserialize)]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsListResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start: Option<GoogleEventTime>,
    #[serde(default)]
    end: Option<GoogleEventTime>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GoogleEventTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDate>,
}

impl GoogleEventTime {
    fn resolve(&self) -> Option<DateTime<Utc>> {
        self.date_time.or_else(|| {
            // All-day events carry a date only; pin them to midnight UTC
            self.date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
    }
}

#[derive(Debug, Serialize)]
struct EventBody {
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    start: GoogleEventTime,
    end: GoogleEventTime,
}

impl EventBody {
    fn from_appointment(appointment: &appointments::Model) -> Self {
        Self {
            summary: format!("{}{}", INTERNAL_EVENT_MARKER, appointment.title),
            description: appointment.notes.clone(),
            start: GoogleEventTime {
                date_time: Some(appointment.starts_at.with_timezone(&Utc)),
                date: None,
            },
            end: GoogleEventTime {
                date_time: Some(appointment.ends_at.with_timezone(&Utc)),
                date: None,
            },
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(RATE_LIMIT_BASE_DELAY_MS * 2u64.pow(attempt.saturating_sub(1)))
}

impl GoogleCalendarService {
    pub fn new(base_url: String) -> Self {
        let calendar_cache = Cache::builder()
            .max_capacity(100)
            .time_to_live(Duration::from_secs(300))
            .build();

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url,
            calendar_cache: Arc::new(calendar_cache),
        }
    }

    /// Sends a request, retrying with bounded exponential backoff while the
    /// provider is throttling. 401 is surfaced as AuthExpired immediately.
    async fn send_with_retry(
        &self,
        make: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, CalendarError> {
        let mut attempt = 0u32;
        loop {
            let response = make().send().await?;
            match response.status() {
                status if status.is_success() => return Ok(response),
                StatusCode::UNAUTHORIZED => return Err(CalendarError::AuthExpired),
                StatusCode::TOO_MANY_REQUESTS => {
                    attempt += 1;
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());

                    if attempt >= RATE_LIMIT_ATTEMPTS {
                        return Err(CalendarError::RateLimited { retry_after });
                    }

                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        "Calendar API rate limited, retrying in {:?} (attempt {}/{})",
                        delay,
                        attempt,
                        RATE_LIMIT_ATTEMPTS
                    );
                    tokio::time::sleep(delay).await;
                }
                status => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(CalendarError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendarService {
    async fn list_calendars(&self, access_token: &str) -> Result<Vec<CalendarInfo>, CalendarError> {
        // The calendar picker hits this on every settings view; cache per token
        let cache_key = format!("calendars_{}", &access_token[..access_token.len().min(16)]);
        if let Some(cached) = self.calendar_cache.get(&cache_key).await {
            tracing::debug!("Calendar list cache hit");
            return Ok(cached);
        }

        let url = format!("{}/users/me/calendarList", self.base_url);
        let response = self
            .send_with_retry(|| self.client.get(&url).bearer_auth(access_token))
            .await?;

        let list: CalendarListResponse = response.json().await?;
        let calendars: Vec<CalendarInfo> = list
            .items
            .into_iter()
            .map(|c| CalendarInfo {
                summary: c.summary.unwrap_or_else(|| c.id.clone()),
                id: c.id,
            })
            .collect();

        tracing::info!("Fetched {} calendars from Google", calendars.len());

        self.calendar_cache
            .insert(cache_key, calendars.clone())
            .await;

        Ok(calendars)
    }

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<RemoteEvent>, CalendarError> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .send_with_retry(|| {
                    let mut request = self
                        .client
                        .get(&url)
                        .bearer_auth(access_token)
                        .query(&[
                            ("timeMin", time_min.to_rfc3339()),
                            ("timeMax", time_max.to_rfc3339()),
                            ("singleEvents", "true".to_string()),
                            ("orderBy", "startTime".to_string()),
                            ("maxResults", EVENTS_PAGE_SIZE.to_string()),
                        ]);
                    if let Some(token) = &page_token {
                        request = request.query(&[("pageToken", token.clone())]);
                    }
                    request
                })
                .await?;

            let page: EventsListResponse = response.json().await?;

            for event in page.items {
                if event.status.as_deref() == Some("cancelled") {
                    continue;
                }
                let (Some(start), Some(end)) = (
                    event.start.as_ref().and_then(GoogleEventTime::resolve),
                    event.end.as_ref().and_then(GoogleEventTime::resolve),
                ) else {
                    tracing::debug!("Skipping event {} without resolvable times", event.id);
                    continue;
                };

                events.push(RemoteEvent {
                    id: event.id,
                    summary: event.summary.unwrap_or_default(),
                    description: event.description,
                    starts_at: start,
                    ends_at: end,
                    updated: event.updated,
                });
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::info!(
            "Fetched {} events from calendar '{}' between {} and {}",
            events.len(),
            calendar_id,
            time_min,
            time_max
        );

        Ok(events)
    }

    async fn upsert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        appointment: &appointments::Model,
    ) -> Result<String, CalendarError> {
        let body = EventBody::from_appointment(appointment);

        if let Some(event_id) = &appointment.external_event_id {
            let url = format!(
                "{}/calendars/{}/events/{}",
                self.base_url, calendar_id, event_id
            );
            let result = self
                .send_with_retry(|| self.client.put(&url).bearer_auth(access_token).json(&body))
                .await;

            match result {
                Ok(response) => {
                    let updated: GoogleEvent = response.json().await?;
                    return Ok(updated.id);
                }
                // The linked event vanished remotely; fall through and recreate
                Err(CalendarError::Api { status: 404, .. })
                | Err(CalendarError::Api { status: 410, .. }) => {
                    tracing::warn!(
                        "Remote event {} is gone, recreating appointment {}",
                        event_id,
                        appointment.id
                    );
                }
                Err(other) => return Err(other),
            }
        }

        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let response = self
            .send_with_retry(|| self.client.post(&url).bearer_auth(access_token).json(&body))
            .await?;

        let created: GoogleEvent = response.json().await?;
        Ok(created.id)
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), CalendarError> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base_url, calendar_id, event_id
        );

        match self
            .send_with_retry(|| self.client.delete(&url).bearer_auth(access_token))
            .await
        {
            Ok(_) => Ok(()),
            // Idempotent delete: already removed on the remote side
            Err(CalendarError::Api { status: 404, .. })
            | Err(CalendarError::Api { status: 410, .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(summary: &str) -> RemoteEvent {
        RemoteEvent {
            id: "evt_1".to_string(),
            summary: summary.to_string(),
            description: None,
            starts_at: Utc::now(),
            ends_at: Utc::now(),
            updated: None,
        }
    }

    #[test]
    fn test_marker_detection() {
        assert!(event("[DentaSync] Contrôle implant").is_internal_origin());
        assert!(!event("Contrôle implant").is_internal_origin());
        // Marker must be a prefix, not a substring
        assert!(!event("Contrôle [DentaSync] implant").is_internal_origin());
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_all_day_event_resolves_to_midnight() {
        let time = GoogleEventTime {
            date_time: None,
            date: Some(NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()),
        };
        let resolved = time.resolve().unwrap();
        assert_eq!(resolved.to_rfc3339(), "2026-03-14T00:00:00+00:00");
    }
}
