use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use log::{debug, warn};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::calendar_provider::{CalendarProvider, RefreshedCredential, TokenPersister};
use super::models::{RemoteChanges, RemoteEvent};
use crate::events::{EventStatus, UnifiedEvent};
use crate::integrations::ProviderKind;
use crate::sync::SyncError;

const BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Adapter for a Google-style calendar REST API: events under a calendar
/// id, RFC3339 or all-day date fields, syncToken incremental listing with
/// HTTP 410 on expired tokens.
pub struct GoogleCalendarProvider {
    client: Client,
    base_url: String,
    token_url: String,
    integration_id: String,
    calendar_id: String,
    access_token: RwLock<String>,
    refresh_token: Option<String>,
    persister: Arc<dyn TokenPersister>,
}

impl GoogleCalendarProvider {
    pub fn new(
        client: Client,
        integration_id: String,
        calendar_id: String,
        access_token: String,
        refresh_token: Option<String>,
        persister: Arc<dyn TokenPersister>,
    ) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            integration_id,
            calendar_id,
            access_token: RwLock::new(access_token),
            refresh_token,
            persister,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_endpoints(mut self, base_url: &str, token_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self.token_url = token_url.to_string();
        self
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.base_url, self.calendar_id)
    }

    /// Sends a request with the current access token; on a 401, refreshes
    /// the credential (persisting it first) and retries exactly once.
    async fn send_authorized(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&GoogleEvent>,
    ) -> Result<reqwest::Response, SyncError> {
        let token = self.access_token.read().await.clone();
        let response = self.request(method.clone(), url, query, body, &token).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Access token rejected for integration {}, refreshing", self.integration_id);
        let token = self.refresh_access_token().await?;
        let response = self.request(method, url, query, body, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SyncError::CredentialExpired(
                "provider rejected a freshly refreshed token".to_string(),
            ));
        }
        Ok(response)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&GoogleEvent>,
        token: &str,
    ) -> Result<reqwest::Response, SyncError> {
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .query(query);
        if let Some(payload) = body {
            builder = builder.json(payload);
        }
        Ok(builder.send().await?)
    }

    /// Exchanges the refresh credential for a new access token and persists
    /// it through the vault before swapping it in. Guarantees a caller never
    /// observes a token that was used but not stored.
    async fn refresh_access_token(&self) -> Result<String, SyncError> {
        let refresh_token = self.refresh_token.as_deref().ok_or_else(|| {
            SyncError::CredentialExpired("no refresh credential stored".to_string())
        })?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::CredentialExpired(format!(
                "token refresh failed with status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let refreshed = RefreshedCredential {
            access: token.access_token.clone(),
            refresh: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        };

        self.persister
            .persist(&self.integration_id, &refreshed)
            .await?;
        *self.access_token.write().await = refreshed.access.clone();

        Ok(refreshed.access)
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn create_event(&self, event: &UnifiedEvent) -> Result<String, SyncError> {
        let payload = to_google_event(event);
        let response = self
            .send_authorized(Method::POST, &self.events_url(), &[], Some(&payload))
            .await?;

        let response = check_mutation_status(response).await?;
        let created: GoogleEvent = response.json().await?;
        created
            .id
            .ok_or_else(|| SyncError::ProviderRejected("created event has no id".to_string()))
    }

    async fn update_event(
        &self,
        external_id: &str,
        event: &UnifiedEvent,
    ) -> Result<String, SyncError> {
        let url = format!("{}/{}", self.events_url(), external_id);
        let payload = to_google_event(event);
        let response = self
            .send_authorized(Method::PUT, &url, &[], Some(&payload))
            .await?;

        let response = check_mutation_status(response).await?;
        let updated: GoogleEvent = response.json().await?;
        Ok(updated.id.unwrap_or_else(|| external_id.to_string()))
    }

    async fn delete_event(&self, external_id: &str) -> Result<(), SyncError> {
        let url = format!("{}/{}", self.events_url(), external_id);
        let response = self
            .send_authorized(Method::DELETE, &url, &[], None)
            .await?;

        check_mutation_status(response).await?;
        Ok(())
    }

    async fn list_events(
        &self,
        checkpoint: Option<&str>,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<RemoteChanges, SyncError> {
        let mut items = Vec::new();
        let mut next_checkpoint = None;
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(String, String)> =
                vec![("singleEvents".to_string(), "true".to_string())];
            // A continuation page is addressed by its pageToken alone; the
            // sync token or window belongs to the first request only.
            match &page_token {
                Some(token) => query.push(("pageToken".to_string(), token.clone())),
                None => match checkpoint {
                    Some(token) => query.push(("syncToken".to_string(), token.to_string())),
                    None => {
                        if let Some((from, to)) = window {
                            query.push(("timeMin".to_string(), from.to_rfc3339()));
                            query.push(("timeMax".to_string(), to.to_rfc3339()));
                        }
                    }
                },
            }

            let response = self
                .send_authorized(Method::GET, &self.events_url(), &query, None)
                .await?;

            let status = response.status();
            if status == StatusCode::GONE {
                // The provider discards stale sync tokens; the caller clears
                // the checkpoint and retries with a full scan.
                return Err(SyncError::InvalidCheckpoint);
            }
            if status.is_server_error() {
                return Err(SyncError::ProviderUnavailable(format!(
                    "list failed with status {}",
                    status
                )));
            }
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(SyncError::ProviderRejected(format!(
                    "list failed with status {}: {}",
                    status, detail
                )));
            }

            let page: GoogleEventsPage = response.json().await?;
            for raw in page.items {
                match from_google_event(raw) {
                    Some(item) => items.push(item),
                    None => warn!("Skipping remote event without usable times"),
                }
            }

            if let Some(token) = page.next_sync_token {
                next_checkpoint = Some(token);
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(RemoteChanges {
            items,
            next_checkpoint,
        })
    }
}

async fn check_mutation_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(SyncError::AlreadyDeleted),
        s if s.is_server_error() => Err(SyncError::ProviderUnavailable(format!(
            "provider returned status {}",
            s
        ))),
        s => {
            let detail = response.text().await.unwrap_or_default();
            Err(SyncError::ProviderRejected(format!(
                "provider returned status {}: {}",
                s, detail
            )))
        }
    }
}

// --- wire format ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<GoogleEventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<GoogleEventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<GoogleAttendee>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleEventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GoogleAttendee {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleEventsPage {
    #[serde(default)]
    pub items: Vec<GoogleEvent>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

pub(crate) fn to_google_event(event: &UnifiedEvent) -> GoogleEvent {
    let (start, end) = if event.all_day {
        (
            GoogleEventTime {
                date: Some(event.start_at.date_naive()),
                ..Default::default()
            },
            GoogleEventTime {
                date: Some(event.end_at.date_naive()),
                ..Default::default()
            },
        )
    } else {
        (
            GoogleEventTime {
                date_time: Some(event.start_at),
                ..Default::default()
            },
            GoogleEventTime {
                date_time: Some(event.end_at),
                ..Default::default()
            },
        )
    };

    GoogleEvent {
        id: None,
        summary: Some(event.title.clone()),
        description: event.description.clone(),
        location: event.location.clone(),
        start: Some(start),
        end: Some(end),
        status: Some(match event.status {
            EventStatus::Scheduled => "confirmed".to_string(),
            EventStatus::Cancelled => "cancelled".to_string(),
        }),
        updated: None,
        attendees: if event.attendees.is_empty() {
            None
        } else {
            Some(
                event
                    .attendees
                    .iter()
                    .map(|email| GoogleAttendee {
                        email: email.clone(),
                    })
                    .collect(),
            )
        },
        recurrence: None,
    }
}

pub(crate) fn from_google_event(raw: GoogleEvent) -> Option<RemoteEvent> {
    let external_id = raw.id?;
    let updated = raw.updated.unwrap_or_else(Utc::now);
    let cancelled = raw.status.as_deref() == Some("cancelled");

    let resolve = |t: &Option<GoogleEventTime>| -> Option<(DateTime<Utc>, bool)> {
        let t = t.as_ref()?;
        if let Some(dt) = t.date_time {
            return Some((dt, false));
        }
        let date = t.date?;
        Some((
            Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?),
            true,
        ))
    };

    let times = resolve(&raw.start).zip(resolve(&raw.end));
    let (start, end, all_day) = match times {
        Some(((start, all_day), (end, _))) => (start, end, all_day),
        // Incremental tombstones carry no times; only useful when cancelled.
        None if cancelled => (updated, updated, false),
        None => return None,
    };

    Some(RemoteEvent {
        external_id,
        title: raw.summary.unwrap_or_default(),
        description: raw.description,
        start_at: start,
        end_at: end,
        all_day,
        location: raw.location,
        attendees: raw
            .attendees
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.email)
            .collect(),
        status: if cancelled {
            EventStatus::Cancelled
        } else {
            EventStatus::Scheduled
        },
        is_recurring: raw.recurrence.is_some(),
        remote_updated_at: updated,
        deleted: cancelled,
    })
}
