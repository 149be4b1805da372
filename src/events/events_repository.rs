use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::sync::Arc;

use crate::db::{get_connection, DbPool};
use crate::events::{EventError, Result};
use crate::schema::calendar_events;
use crate::schema::calendar_events::dsl::*;

use super::events_model::{CalendarEventDB, EventStatus, NewEvent, UnifiedEvent};

/// Repository for managing calendar events in the database
pub struct EventRepository {
    pool: Arc<DbPool>,
}

impl EventRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Creates a new event in the database
    pub fn create(&self, new_event: NewEvent) -> Result<UnifiedEvent> {
        new_event.validate()?;

        let now = Utc::now();
        let event_db = CalendarEventDB {
            id: uuid::Uuid::new_v4().to_string(),
            kind: new_event.kind.as_str().to_string(),
            title: new_event.title,
            description: new_event.description,
            start_at: new_event.start_at,
            end_at: new_event.end_at,
            all_day: new_event.all_day,
            location: new_event.location,
            attendees: if new_event.attendees.is_empty() {
                None
            } else {
                serde_json::to_string(&new_event.attendees).ok()
            },
            status: EventStatus::Scheduled.as_str().to_string(),
            is_recurring: new_event.is_recurring,
            client_id: new_event.client_id,
            created_at: now,
            updated_at: now,
        };

        let mut conn = get_connection(&self.pool)
            .map_err(|e| EventError::DatabaseError(e.to_string()))?;

        diesel::insert_into(calendar_events::table)
            .values(&event_db)
            .execute(&mut conn)?;

        Ok(event_db.into())
    }

    /// Retrieves an event by its ID
    pub fn get_by_id(&self, event_id: &str) -> Result<UnifiedEvent> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| EventError::DatabaseError(e.to_string()))?;

        let event = calendar_events
            .find(event_id)
            .first::<CalendarEventDB>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    EventError::NotFound(format!("Event with id {} not found", event_id))
                }
                _ => EventError::DatabaseError(e.to_string()),
            })?;

        Ok(event.into())
    }

    /// Updates an existing event, refreshing its modification timestamp
    pub fn update(&self, event: UnifiedEvent) -> Result<UnifiedEvent> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| EventError::DatabaseError(e.to_string()))?;

        let mut event_db: CalendarEventDB = event.into();
        event_db.updated_at = Utc::now();

        let affected = diesel::update(calendar_events.find(&event_db.id))
            .set(&event_db)
            .execute(&mut conn)?;

        if affected == 0 {
            return Err(EventError::NotFound(format!(
                "Event with id {} not found",
                event_db.id
            )));
        }

        Ok(event_db.into())
    }

    /// Inserts or replaces an event pulled from a remote calendar.
    ///
    /// Each pulled item is committed on its own, so one malformed remote
    /// item never rolls back the rest of a pull batch.
    pub fn upsert_pulled(&self, event: UnifiedEvent) -> Result<UnifiedEvent> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| EventError::DatabaseError(e.to_string()))?;

        let event_db: CalendarEventDB = event.into();

        diesel::insert_into(calendar_events::table)
            .values(&event_db)
            .on_conflict(id)
            .do_update()
            .set(&event_db)
            .execute(&mut conn)?;

        Ok(event_db.into())
    }

    /// Lists events overlapping the given window, ordered by start time
    pub fn list_between(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<UnifiedEvent>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| EventError::DatabaseError(e.to_string()))?;

        calendar_events
            .filter(start_at.le(window_end))
            .filter(end_at.ge(window_start))
            .order(start_at.asc())
            .load::<CalendarEventDB>(&mut conn)
            .map(|results| results.into_iter().map(UnifiedEvent::from).collect())
            .map_err(|e| EventError::DatabaseError(e.to_string()))
    }

    /// Marks an event as cancelled without deleting it
    pub fn mark_cancelled(&self, event_id: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| EventError::DatabaseError(e.to_string()))?;

        let affected = diesel::update(calendar_events.find(event_id))
            .set((
                status.eq(EventStatus::Cancelled.as_str()),
                updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        if affected == 0 {
            return Err(EventError::NotFound(format!(
                "Event with id {} not found",
                event_id
            )));
        }

        Ok(())
    }
}
