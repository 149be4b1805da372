use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{EventKind, EventStatus, NewEvent, UnifiedEvent};

/// A remote calendar item translated out of a provider's native shape.
/// Only the adapters ever see provider payloads; everything downstream of
/// the adapter works with this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub status: EventStatus,
    pub is_recurring: bool,
    /// Last modification time as reported by the provider
    pub remote_updated_at: DateTime<Utc>,
    /// True for tombstones in incremental listings
    pub deleted: bool,
}

impl RemoteEvent {
    /// Builds the local event input for a remote item seen for the first time
    pub fn to_new_event(&self) -> NewEvent {
        NewEvent {
            kind: EventKind::Event,
            title: self.title.clone(),
            description: self.description.clone(),
            start_at: self.start_at,
            end_at: self.end_at,
            all_day: self.all_day,
            location: self.location.clone(),
            attendees: self.attendees.clone(),
            is_recurring: self.is_recurring,
            client_id: None,
        }
    }

    /// Applies the remote state onto an existing local event
    pub fn apply_to(&self, event: &mut UnifiedEvent) {
        event.title = self.title.clone();
        event.description = self.description.clone();
        event.start_at = self.start_at;
        event.end_at = self.end_at;
        event.all_day = self.all_day;
        event.location = self.location.clone();
        event.attendees = self.attendees.clone();
        event.status = self.status;
        event.is_recurring = self.is_recurring;
    }

    /// Names the fields that differ from the local copy, for conflict reports
    pub fn changed_fields(&self, event: &UnifiedEvent) -> Vec<String> {
        let mut changed = Vec::new();
        if self.title != event.title {
            changed.push("title".to_string());
        }
        if self.description != event.description {
            changed.push("description".to_string());
        }
        if self.start_at != event.start_at || self.end_at != event.end_at {
            changed.push("time".to_string());
        }
        if self.all_day != event.all_day {
            changed.push("allDay".to_string());
        }
        if self.location != event.location {
            changed.push("location".to_string());
        }
        if self.attendees != event.attendees {
            changed.push("attendees".to_string());
        }
        if self.status != event.status {
            changed.push("status".to_string());
        }
        changed
    }
}

/// One page-complete listing of remote changes plus the checkpoint to store
#[derive(Debug, Clone, Default)]
pub struct RemoteChanges {
    pub items: Vec<RemoteEvent>,
    pub next_checkpoint: Option<String>,
}
