use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::events_errors::EventError;

pub const EVENT_STATUS_SCHEDULED: &str = "scheduled";
pub const EVENT_STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Event,
    FollowUp,
    Deadline,
    Reminder,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Event => "event",
            EventKind::FollowUp => "follow-up",
            EventKind::Deadline => "deadline",
            EventKind::Reminder => "reminder",
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "follow-up" => EventKind::FollowUp,
            "deadline" => EventKind::Deadline,
            "reminder" => EventKind::Reminder,
            _ => EventKind::Event,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Scheduled,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Scheduled => EVENT_STATUS_SCHEDULED,
            EventStatus::Cancelled => EVENT_STATUS_CANCELLED,
        }
    }
}

impl From<&str> for EventStatus {
    fn from(s: &str) -> Self {
        match s {
            EVENT_STATUS_CANCELLED => EventStatus::Cancelled,
            _ => EventStatus::Scheduled,
        }
    }
}

/// Domain model for a provider-agnostic calendar event.
///
/// All timestamps are UTC; the original zone offset is applied by the
/// provider adapters when translating to a provider's representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedEvent {
    pub id: String,
    pub kind: EventKind,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub status: EventStatus,
    pub is_recurring: bool,
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input model for creating a new event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub kind: EventKind,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub is_recurring: bool,
    pub client_id: Option<String>,
}

impl NewEvent {
    pub fn validate(&self) -> Result<(), EventError> {
        if self.title.trim().is_empty() {
            return Err(EventError::InvalidData("title must not be empty".to_string()));
        }
        if !self.all_day && self.end_at < self.start_at {
            return Err(EventError::InvalidData(
                "event end must not be before its start".to_string(),
            ));
        }
        Ok(())
    }
}

/// Database model for calendar events
#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::calendar_events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CalendarEventDB {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub attendees: Option<String>,
    pub status: String,
    pub is_recurring: bool,
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CalendarEventDB> for UnifiedEvent {
    fn from(db: CalendarEventDB) -> Self {
        let attendees = db
            .attendees
            .as_deref()
            .map(|raw| serde_json::from_str(raw).unwrap_or_default())
            .unwrap_or_default();

        UnifiedEvent {
            id: db.id,
            kind: EventKind::from(db.kind.as_str()),
            title: db.title,
            description: db.description,
            start_at: db.start_at,
            end_at: db.end_at,
            all_day: db.all_day,
            location: db.location,
            attendees,
            status: EventStatus::from(db.status.as_str()),
            is_recurring: db.is_recurring,
            client_id: db.client_id,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

impl From<UnifiedEvent> for CalendarEventDB {
    fn from(domain: UnifiedEvent) -> Self {
        let attendees = if domain.attendees.is_empty() {
            None
        } else {
            serde_json::to_string(&domain.attendees).ok()
        };

        CalendarEventDB {
            id: domain.id,
            kind: domain.kind.as_str().to_string(),
            title: domain.title,
            description: domain.description,
            start_at: domain.start_at,
            end_at: domain.end_at,
            all_day: domain.all_day,
            location: domain.location,
            attendees,
            status: domain.status.as_str().to_string(),
            is_recurring: domain.is_recurring,
            client_id: domain.client_id,
            created_at: domain.created_at,
            updated_at: domain.updated_at,
        }
    }
}
