use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, warn};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::calendar_provider::{CalendarProvider, RefreshedCredential, TokenPersister};
use super::models::{RemoteChanges, RemoteEvent};
use crate::events::{EventStatus, UnifiedEvent};
use crate::integrations::ProviderKind;
use crate::sync::SyncError;

const BASE_URL: &str = "https://api.notion.com/v1";
const TOKEN_URL: &str = "https://api.notion.com/v1/oauth/token";
const API_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

/// Adapter for a Notion-style document database: events are pages with
/// typed properties, listing is a filtered database query paged by cursor,
/// the incremental checkpoint is a `last_edited_time` watermark, and
/// deletion is archival.
pub struct NotionCalendarProvider {
    client: Client,
    base_url: String,
    token_url: String,
    integration_id: String,
    database_id: String,
    access_token: RwLock<String>,
    refresh_token: Option<String>,
    persister: Arc<dyn TokenPersister>,
}

impl NotionCalendarProvider {
    pub fn new(
        client: Client,
        integration_id: String,
        database_id: String,
        access_token: String,
        refresh_token: Option<String>,
        persister: Arc<dyn TokenPersister>,
    ) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            integration_id,
            database_id,
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

    async fn send_authorized(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, SyncError> {
        let token = self.access_token.read().await.clone();
        let response = self.request(method.clone(), url, body, &token).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Access token rejected for integration {}, refreshing", self.integration_id);
        let token = self.refresh_access_token().await?;
        let response = self.request(method, url, body, &token).await?;
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
        body: Option<&serde_json::Value>,
        token: &str,
    ) -> Result<reqwest::Response, SyncError> {
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("Notion-Version", API_VERSION);
        if let Some(payload) = body {
            builder = builder.json(payload);
        }
        Ok(builder.send().await?)
    }

    async fn refresh_access_token(&self) -> Result<String, SyncError> {
        let refresh_token = self.refresh_token.as_deref().ok_or_else(|| {
            SyncError::CredentialExpired("no refresh credential stored".to_string())
        })?;

        let response = self
            .client
            .post(&self.token_url)
            .json(&json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }))
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
impl CalendarProvider for NotionCalendarProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Notion
    }

    async fn create_event(&self, event: &UnifiedEvent) -> Result<String, SyncError> {
        let url = format!("{}/pages", self.base_url);
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": to_notion_properties(event),
        });

        let response = self
            .send_authorized(Method::POST, &url, Some(&body))
            .await?;
        let response = check_mutation_status(response).await?;

        let page: NotionPage = response.json().await?;
        Ok(page.id)
    }

    async fn update_event(
        &self,
        external_id: &str,
        event: &UnifiedEvent,
    ) -> Result<String, SyncError> {
        let url = format!("{}/pages/{}", self.base_url, external_id);
        let body = json!({ "properties": to_notion_properties(event) });

        let response = self
            .send_authorized(Method::PATCH, &url, Some(&body))
            .await?;
        let response = check_mutation_status(response).await?;

        let page: NotionPage = response.json().await?;
        Ok(page.id)
    }

    async fn delete_event(&self, external_id: &str) -> Result<(), SyncError> {
        let url = format!("{}/pages/{}", self.base_url, external_id);
        let body = json!({ "archived": true });

        let response = self
            .send_authorized(Method::PATCH, &url, Some(&body))
            .await?;
        check_mutation_status(response).await?;
        Ok(())
    }

    async fn list_events(
        &self,
        checkpoint: Option<&str>,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<RemoteChanges, SyncError> {
        // The checkpoint is our own last_edited_time watermark; one we
        // cannot parse is as unusable as one the provider rejects.
        let watermark = checkpoint
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| SyncError::InvalidCheckpoint)
            })
            .transpose()?;

        let url = format!("{}/databases/{}/query", self.base_url, self.database_id);
        let mut items = Vec::new();
        let mut latest_edit: Option<DateTime<Utc>> = watermark;
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(mark) = watermark {
                body["filter"] = json!({
                    "timestamp": "last_edited_time",
                    "last_edited_time": {
                        "after": mark.to_rfc3339_opts(SecondsFormat::Millis, true)
                    }
                });
            } else if let Some((from, to)) = window {
                body["filter"] = json!({
                    "property": "Date",
                    "date": {
                        "on_or_after": from.to_rfc3339_opts(SecondsFormat::Millis, true),
                        "on_or_before": to.to_rfc3339_opts(SecondsFormat::Millis, true),
                    }
                });
            }
            if let Some(token) = &cursor {
                body["start_cursor"] = json!(token);
            }

            let response = self
                .send_authorized(Method::POST, &url, Some(&body))
                .await?;

            let status = response.status();
            if status == StatusCode::BAD_REQUEST && checkpoint.is_some() {
                return Err(SyncError::InvalidCheckpoint);
            }
            if status.is_server_error() {
                return Err(SyncError::ProviderUnavailable(format!(
                    "query failed with status {}",
                    status
                )));
            }
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(SyncError::ProviderRejected(format!(
                    "query failed with status {}: {}",
                    status, detail
                )));
            }

            let page: NotionQueryPage = response.json().await?;
            for raw in page.results {
                let edited = raw.last_edited_time;
                match from_notion_page(raw) {
                    Some(item) => {
                        if latest_edit.map_or(true, |seen| edited > seen) {
                            latest_edit = Some(edited);
                        }
                        items.push(item);
                    }
                    None => warn!("Skipping page without a usable date property"),
                }
            }

            if page.has_more {
                cursor = page.next_cursor;
            } else {
                break;
            }
        }

        Ok(RemoteChanges {
            items,
            next_checkpoint: latest_edit
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
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

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NotionPage {
    pub id: String,
    #[serde(default)]
    pub archived: bool,
    pub last_edited_time: DateTime<Utc>,
    #[serde(default)]
    pub properties: NotionProperties,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct NotionProperties {
    #[serde(rename = "Name")]
    pub name: Option<NotionTitle>,
    #[serde(rename = "Description")]
    pub description: Option<NotionRichTextProp>,
    #[serde(rename = "Date")]
    pub date: Option<NotionDateProp>,
    #[serde(rename = "Location")]
    pub location: Option<NotionRichTextProp>,
    #[serde(rename = "Status")]
    pub status: Option<NotionSelectProp>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct NotionTitle {
    #[serde(default)]
    pub title: Vec<NotionText>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct NotionRichTextProp {
    #[serde(default)]
    pub rich_text: Vec<NotionText>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NotionText {
    pub plain_text: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct NotionDateProp {
    pub date: Option<NotionDateValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NotionDateValue {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct NotionSelectProp {
    pub select: Option<NotionSelectValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NotionSelectValue {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NotionQueryPage {
    #[serde(default)]
    pub results: Vec<NotionPage>,
    #[serde(default)]
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

fn rich_text(value: &str) -> serde_json::Value {
    json!([{ "text": { "content": value }, "plain_text": value }])
}

pub(crate) fn to_notion_properties(event: &UnifiedEvent) -> serde_json::Value {
    let mut properties = json!({
        "Name": { "title": rich_text(&event.title) },
        "Date": {
            "date": {
                "start": event.start_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                "end": event.end_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            }
        },
        "Status": { "select": { "name": match event.status {
            EventStatus::Scheduled => "Scheduled",
            EventStatus::Cancelled => "Cancelled",
        } } },
    });

    if let Some(description) = &event.description {
        properties["Description"] = json!({ "rich_text": rich_text(description) });
    }
    if let Some(location) = &event.location {
        properties["Location"] = json!({ "rich_text": rich_text(location) });
    }

    properties
}

fn plain_text(texts: &[NotionText]) -> Option<String> {
    if texts.is_empty() {
        return None;
    }
    Some(
        texts
            .iter()
            .map(|t| t.plain_text.as_str())
            .collect::<Vec<_>>()
            .join(""),
    )
}

pub(crate) fn from_notion_page(page: NotionPage) -> Option<RemoteEvent> {
    if page.archived {
        // Archived pages are tombstones; dates may be gone already.
        return Some(RemoteEvent {
            external_id: page.id,
            title: String::new(),
            description: None,
            start_at: page.last_edited_time,
            end_at: page.last_edited_time,
            all_day: false,
            location: None,
            attendees: Vec::new(),
            status: EventStatus::Cancelled,
            is_recurring: false,
            remote_updated_at: page.last_edited_time,
            deleted: true,
        });
    }

    let date = page.properties.date.as_ref()?.date.as_ref()?;
    let start = date.start;
    let end = date.end.unwrap_or(start);

    let cancelled = page
        .properties
        .status
        .as_ref()
        .and_then(|s| s.select.as_ref())
        .map(|s| s.name.eq_ignore_ascii_case("cancelled"))
        .unwrap_or(false);

    Some(RemoteEvent {
        external_id: page.id,
        title: page
            .properties
            .name
            .as_ref()
            .and_then(|n| plain_text(&n.title))
            .unwrap_or_default(),
        description: page
            .properties
            .description
            .as_ref()
            .and_then(|d| plain_text(&d.rich_text)),
        start_at: start,
        end_at: end,
        all_day: false,
        location: page
            .properties
            .location
            .as_ref()
            .and_then(|l| plain_text(&l.rich_text)),
        attendees: Vec::new(),
        status: if cancelled {
            EventStatus::Cancelled
        } else {
            EventStatus::Scheduled
        },
        is_recurring: false,
        remote_updated_at: page.last_edited_time,
        deleted: false,
    })
}
